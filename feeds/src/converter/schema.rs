use super::fields::{
    blockchain_op, int32_else_string, joined, labelled, labelled_int32_else_string, string,
    string_with_prefix, timestamp,
};
use super::{Schema, SchemaNode};
use std::sync::LazyLock;

use SchemaNode::{Branch, Leaf};

const SEISMICPORTAL_EVENT_DETAILS: &str = "https://www.seismicportal.eu/eventdetails.html?unid=";

/// Field mapping for the public feeds this service understands: exchange
/// tickers, seismicportal.eu earthquakes and blockchain.info blocks.
pub static DEFAULT_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    let earthquake = Schema::from([
        ("auth", Leaf(string("subject"))),
        ("depth", Leaf(string_with_prefix("elevation", "-"))),
        ("flynn_region", Leaf(labelled("location", "Earthquake location"))),
        ("lat", Leaf(string("latitude"))),
        ("lon", Leaf(string("longitude"))),
        (
            "mag",
            Leaf(labelled_int32_else_string("magnitude", "Earthquake magnitude")),
        ),
        ("magtype", Leaf(string("magnitudetype"))),
        ("sourcecatalog", Leaf(string("sourcecatalog"))),
        ("sourceid", Leaf(string("sourceid"))),
        ("time", Leaf(timestamp("time"))),
        (
            "unid",
            Leaf(string_with_prefix("objecturl", SEISMICPORTAL_EVENT_DETAILS)),
        ),
    ]);

    let block = Schema::from([
        ("txIndexes", Leaf(joined("xtxindexes", " "))),
        ("nTx", Leaf(int32_else_string("xntx"))),
        ("totalBTCSent", Leaf(int32_else_string("xtotalbtcsent"))),
        ("estimatedBTCSent", Leaf(int32_else_string("xestimatedbtcsent"))),
        ("reward", Leaf(labelled("xreward", "Reward"))),
        ("size", Leaf(int32_else_string("xsize"))),
        ("blockIndex", Leaf(labelled("xblockindex", "Index"))),
        ("prevBlockIndex", Leaf(int32_else_string("xprevblockindex"))),
        ("height", Leaf(int32_else_string("xheight"))),
        ("hash", Leaf(labelled("xhash", "Hash"))),
        ("mrklRoot", Leaf(string("xmrklroot"))),
        ("version", Leaf(int32_else_string("xversion"))),
        ("time", Leaf(timestamp("time"))),
        ("bits", Leaf(int32_else_string("xbits"))),
        ("nonce", Leaf(int32_else_string("nonce"))),
    ]);

    Schema::from([
        ("action", Leaf(string("action"))),
        ("best_ask", Leaf(string("bestbask"))),
        ("best_ask_size", Leaf(string("bestasksize"))),
        ("best_bid", Leaf(string("bestbid"))),
        ("best_bid_size", Leaf(string("bestbidsize"))),
        (
            "data",
            Branch(Schema::from([("properties", Branch(earthquake))])),
        ),
        ("high_24h", Leaf(int32_else_string("high24h"))),
        ("last_size", Leaf(int32_else_string("lastsize"))),
        ("low_24h", Leaf(int32_else_string("low24h"))),
        ("op", Leaf(blockchain_op("action"))),
        ("open_24h", Leaf(int32_else_string("open24h"))),
        ("price", Leaf(labelled_int32_else_string("offersprice", "Price"))),
        ("product_id", Leaf(labelled("productid", "Ticker product id"))),
        ("sequence", Leaf(int32_else_string("sequence"))),
        ("side", Leaf(labelled("side", "Ticker side"))),
        ("time", Leaf(timestamp("time"))),
        ("trade_id", Leaf(int32_else_string("tradeid"))),
        ("volume_24h", Leaf(int32_else_string("volume24h"))),
        ("volume_30d", Leaf(int32_else_string("volume30d"))),
        ("x", Branch(block)),
    ])
});
