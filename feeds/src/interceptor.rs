//! Ordered message processors. The first interceptor that claims a message
//! handles it completely; the default one converts and publishes.

use crate::config::{DropRule, InterceptorsConfig};
use crate::converter::{ConversionError, Converter};
use crate::publisher::{PublishError, Publisher};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum InterceptError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Returns `Ok(false)` without side effects when the message is not
    /// claimed. An error always means the message was claimed.
    async fn handle(&self, source: &str, raw: &Map<String, Value>) -> Result<bool, InterceptError>;
}

pub struct DefaultInterceptor {
    converter: Converter,
    publisher: Arc<dyn Publisher>,
    group_id: String,
}

impl DefaultInterceptor {
    pub fn new(converter: Converter, publisher: Arc<dyn Publisher>, group_id: &str) -> Self {
        DefaultInterceptor {
            converter,
            publisher,
            group_id: group_id.to_string(),
        }
    }
}

#[async_trait]
impl Interceptor for DefaultInterceptor {
    async fn handle(&self, source: &str, raw: &Map<String, Value>) -> Result<bool, InterceptError> {
        let event = self.converter.convert(source, raw)?;
        self.publisher.write(&event, &self.group_id, source).await?;
        Ok(true)
    }
}

/// Claims and discards messages whose top-level field has a given value.
pub struct DropMatching {
    rule: DropRule,
}

impl DropMatching {
    pub fn new(rule: DropRule) -> Self {
        DropMatching { rule }
    }
}

#[async_trait]
impl Interceptor for DropMatching {
    async fn handle(&self, _source: &str, raw: &Map<String, Value>) -> Result<bool, InterceptError> {
        Ok(raw.get(&self.rule.field) == Some(&self.rule.value))
    }
}

/// Records the outcome of claimed messages without changing it.
pub struct Logging<I> {
    inner: I,
    name: String,
}

impl<I: Interceptor> Logging<I> {
    pub fn new(inner: I, name: impl Into<String>) -> Self {
        Logging {
            inner,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<I: Interceptor> Interceptor for Logging<I> {
    async fn handle(&self, source: &str, raw: &Map<String, Value>) -> Result<bool, InterceptError> {
        let result = self.inner.handle(source, raw).await;
        match &result {
            Ok(true) => tracing::debug!(interceptor = %self.name, source, "Message handled"),
            Ok(false) => {}
            Err(InterceptError::Conversion(e)) => {
                tracing::warn!(interceptor = %self.name, source, error = %e, "Message conversion failed")
            }
            Err(e) => tracing::error!(interceptor = %self.name, source, error = %e, "Message handling failed"),
        }
        result
    }
}

pub struct Chain {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl Chain {
    pub fn new(interceptors: Vec<Box<dyn Interceptor>>) -> Self {
        Chain { interceptors }
    }

    /// Drop rules first, in configured order, then the default interceptor.
    pub fn from_config(config: &InterceptorsConfig, default: DefaultInterceptor) -> Self {
        let mut interceptors: Vec<Box<dyn Interceptor>> = config
            .drop
            .iter()
            .map(|rule| {
                let name = format!("drop({}={})", rule.field, rule.value);
                Box::new(Logging::new(DropMatching::new(rule.clone()), name)) as Box<dyn Interceptor>
            })
            .collect();
        interceptors.push(Box::new(Logging::new(default, "default")));
        Chain { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Returns whether any interceptor claimed the message.
    pub async fn handle(&self, source: &str, raw: &Map<String, Value>) -> Result<bool, InterceptError> {
        for interceptor in &self.interceptors {
            if interceptor.handle(source, raw).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DEFAULT_EVENT_TYPE;
    use crate::testutils::MockPublisher;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn default_interceptor(publisher: &Arc<MockPublisher>) -> DefaultInterceptor {
        DefaultInterceptor::new(
            Converter::new(DEFAULT_EVENT_TYPE),
            publisher.clone(),
            "default",
        )
    }

    struct Counting {
        claims: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Interceptor for Counting {
        async fn handle(&self, _: &str, _: &Map<String, Value>) -> Result<bool, InterceptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.claims)
        }
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_claim() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(vec![
            Box::new(Counting { claims: false, calls: calls.clone() }),
            Box::new(Counting { claims: true, calls: calls.clone() }),
            Box::new(Counting { claims: true, calls: calls.clone() }),
        ]);

        assert!(chain.handle("src", &raw(json!({}))).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let none = Chain::new(vec![Box::new(Counting { claims: false, calls })]);
        assert!(!none.handle("src", &raw(json!({}))).await.unwrap());
    }

    #[tokio::test]
    async fn test_default_publishes() {
        let publisher = Arc::new(MockPublisher::default());
        let interceptor = Logging::new(default_interceptor(&publisher), "default");

        let claimed = interceptor
            .handle("wss://feed.example", &raw(json!({"side": "sell"})))
            .await
            .unwrap();
        assert!(claimed);

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event.source, "wss://feed.example");
        assert_eq!(published[0].group_id, "default");
        assert_eq!(published[0].user_id, "wss://feed.example");
    }

    #[tokio::test]
    async fn test_default_errors() {
        let publisher = Arc::new(MockPublisher::default());
        let interceptor = default_interceptor(&publisher);

        let err = interceptor
            .handle("src", &raw(json!({"side": []})))
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptError::Conversion(_)));

        let err = interceptor
            .handle("noack", &raw(json!({"side": "buy"})))
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptError::Publish(PublishError::NoAck { .. })));

        let err = interceptor
            .handle("fail", &raw(json!({"side": "buy"})))
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptError::Publish(PublishError::Failed(_))));

        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_drop_rules_run_first() {
        let publisher = Arc::new(MockPublisher::default());
        let config = InterceptorsConfig {
            drop: vec![DropRule {
                field: "type".into(),
                value: json!("heartbeat"),
            }],
        };
        let chain = Chain::from_config(&config, default_interceptor(&publisher));
        assert_eq!(chain.len(), 2);

        assert!(chain.handle("src", &raw(json!({"type": "heartbeat", "side": "buy"}))).await.unwrap());
        assert!(publisher.published().is_empty());

        assert!(chain.handle("src", &raw(json!({"type": "ticker", "side": "buy"}))).await.unwrap());
        assert_eq!(publisher.published().len(), 1);
    }
}
