use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::range::{dollars, SearchRange};
use crate::{Error, Result, WINDOW_CAP};

/// One listing as the backend returns it.
///
/// `id` is unique per stone, but the same stone can show up twice when two
/// leaf ranges share a boundary price.
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    pub id: String,
    /// Asking price in dollars.
    pub price: f64,
    /// Everything else the listing carries (carat, cut, grades, ...).
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Match count for a range, with no items attached.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub range: SearchRange,
    pub total_matches: usize,
}

/// One page of results for a range.
#[derive(Debug)]
pub struct ItemPage {
    pub items: Vec<RawItem>,
    pub has_more: bool,
}

/// The search service seam. The HTTP implementation talks to the real
/// backend; tests swap in a synthetic in-memory one.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Asks only how many items fall in `range`.
    async fn probe(&self, range: SearchRange) -> Result<ProbeResult>;

    /// Fetches one page of `range` starting at `offset`. Callers keep
    /// `offset + page_size` under [`WINDOW_CAP`]; the backend truncates
    /// silently past it.
    async fn fetch_page(
        &self,
        range: SearchRange,
        offset: usize,
        page_size: usize,
    ) -> Result<ItemPage>;
}

/// Raw search response body.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    total: usize,
    items: Vec<RawItem>,
}

/// `reqwest`-backed client for the search endpoint. Holds no state between
/// calls besides the connection pool.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    shape: Shape,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, shape: Shape, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            shape,
        })
    }

    async fn search(
        &self,
        range: SearchRange,
        offset: usize,
        page_size: usize,
    ) -> Result<SearchResponse> {
        let res = self
            .client
            .get(&self.base_url)
            .query(&[
                ("shape", self.shape.as_query().to_string()),
                ("minPrice", dollars(range.low)),
                ("maxPrice", dollars(range.high)),
                ("rowStart", offset.to_string()),
                ("pageSize", page_size.to_string()),
            ])
            .send()
            .await?;

        match res.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(Error::RateLimited),
            status if !status.is_success() => return Err(Error::Status(status)),
            _ => {}
        }

        // Decode by hand so a garbled body surfaces as a decode error instead
        // of a transport error.
        let body = res.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn probe(&self, range: SearchRange) -> Result<ProbeResult> {
        // pageSize 0 keeps the probe cheap: the backend only reports the total.
        let res = self.search(range, 0, 0).await?;
        Ok(ProbeResult {
            range,
            total_matches: res.total,
        })
    }

    async fn fetch_page(
        &self,
        range: SearchRange,
        offset: usize,
        page_size: usize,
    ) -> Result<ItemPage> {
        let res = self.search(range, offset, page_size).await?;
        let reachable = res.total.min(WINDOW_CAP);
        let has_more = offset + res.items.len() < reachable;
        Ok(ItemPage {
            items: res.items,
            has_more,
        })
    }
}

/// Shapes the search backend indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Round,
    Princess,
    Cushion,
    Emerald,
    Oval,
    Radiant,
    Asscher,
    Marquise,
    Heart,
    Pear,
}

impl Shape {
    /// The value the search endpoint expects in its `shape` parameter.
    pub fn as_query(&self) -> &'static str {
        match self {
            Shape::Round => "round",
            Shape::Princess => "princess",
            Shape::Cushion => "cushion",
            Shape::Emerald => "emerald",
            Shape::Oval => "oval",
            Shape::Radiant => "radiant",
            Shape::Asscher => "asscher",
            Shape::Marquise => "marquise",
            Shape::Heart => "heart",
            Shape::Pear => "pear",
        }
    }
}

impl FromStr for Shape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "round" => Ok(Shape::Round),
            "princess" => Ok(Shape::Princess),
            "cushion" => Ok(Shape::Cushion),
            "emerald" => Ok(Shape::Emerald),
            "oval" => Ok(Shape::Oval),
            "radiant" => Ok(Shape::Radiant),
            "asscher" => Ok(Shape::Asscher),
            "marquise" => Ok(Shape::Marquise),
            "heart" => Ok(Shape::Heart),
            "pear" => Ok(Shape::Pear),
            other => Err(Error::UnknownShape(other.into())),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_item_keeps_unknown_fields_as_attributes() {
        let item: RawItem =
            serde_json::from_str(r#"{"id":"d-1","price":512.5,"carat":0.31,"cut":"Ideal"}"#)
                .unwrap();
        assert_eq!(item.id, "d-1");
        assert_eq!(item.price, 512.5);
        assert_eq!(item.attributes.get("carat"), Some(&Value::from(0.31)));
        assert_eq!(item.attributes.get("cut"), Some(&Value::from("Ideal")));
    }

    #[test]
    fn shape_parses_case_insensitively() {
        assert_eq!("Round".parse::<Shape>().unwrap(), Shape::Round);
        assert_eq!("PEAR".parse::<Shape>().unwrap(), Shape::Pear);
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        assert!("triangle".parse::<Shape>().is_err());
    }
}
