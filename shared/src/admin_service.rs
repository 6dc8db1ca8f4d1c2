use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::{Ready, ready};

/// Serves the liveness and readiness probes.
///
/// `/health` always answers ok while the process is up, `/ready` consults the
/// `is_ready` callback on every request.
pub struct AdminService<F> {
    is_ready: F,
}

impl<F> AdminService<F>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self { is_ready }
    }
}

impl<F, B> Service<Request<B>> for AdminService<F>
where
    F: Fn() -> bool,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

        let res = match req.uri().path() {
            "/health" => Response::new(ok_body()),
            "/ready" => match (self.is_ready)() {
                true => Response::new(ok_body()),
                false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            _ => make_boxed_error_response(StatusCode::NOT_FOUND),
        };
        ready(Ok(res))
    }
}
