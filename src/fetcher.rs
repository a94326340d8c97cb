use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::{Category, Market};

#[derive(Debug, Default)]
pub struct FetchStats {
    pub api_total: usize,
    pub rejected_no_tokens: usize,
    pub rejected_no_outcomes: usize,
    pub rejected_low_volume: usize,
    pub qualified: usize,
    /// Sample of (question, outcomes) rejected by the no_outcomes filter.
    pub outcome_samples: Vec<(String, Vec<String>)>,
}

/// Fetch active markets from the Gamma REST API, applying the catalog filters.
/// Orders by volume_24hr descending so the catalog fills with the highest-activity
/// markets first, then stops once `catalog_max_markets` is reached.
pub async fn fetch_markets(cfg: &Config) -> Result<(Vec<Market>, FetchStats)> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut markets = Vec::new();
    let mut stats = FetchStats::default();
    let mut offset = 0usize;
    let page_size = 500usize;

    'outer: loop {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}&offset={}&order=volume24hr&ascending=false",
            cfg.gamma_api_url, page_size, offset
        );

        let resp: serde_json::Value = client.get(&url).send().await?.json().await?;

        let Some(items) = resp.as_array() else {
            return Err(AppError::Bootstrap(
                "GAMMA /markets response was not an array".to_string(),
            ));
        };

        if items.is_empty() {
            break;
        }

        stats.api_total += items.len();

        for item in items {
            match parse_gamma_market_checked(item, cfg.catalog_min_volume_24h) {
                Ok(market) => {
                    markets.push(market);
                    if markets.len() >= cfg.catalog_max_markets {
                        break 'outer;
                    }
                }
                Err(Rejection::NoTokens) => stats.rejected_no_tokens += 1,
                Err(Rejection::NoOutcomes(q, outcomes)) => {
                    stats.rejected_no_outcomes += 1;
                    if stats.outcome_samples.len() < 10 {
                        stats.outcome_samples.push((q, outcomes));
                    }
                }
                Err(Rejection::LowVolume) => stats.rejected_low_volume += 1,
            }
        }

        if items.len() < page_size {
            break;
        }
        offset += page_size;
    }

    stats.qualified = markets.len();
    Ok((markets, stats))
}

#[derive(Debug, PartialEq)]
enum Rejection {
    NoTokens,
    NoOutcomes(String, Vec<String>),
    LowVolume,
}

/// Gamma encodes list fields as JSON strings inside the JSON object.
fn string_list(v: &serde_json::Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(|s| s.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

fn number(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
}

fn parse_gamma_market_checked(
    v: &serde_json::Value,
    min_volume_24h: f64,
) -> std::result::Result<Market, Rejection> {
    let token_ids = string_list(v, "clobTokenIds");
    if token_ids.len() < 2 {
        return Err(Rejection::NoTokens);
    }

    let outcomes = string_list(v, "outcomes");
    let yes_idx = outcomes.iter().position(|o| {
        o.eq_ignore_ascii_case("Yes") || o.eq_ignore_ascii_case("Up")
    });
    let no_idx = outcomes.iter().position(|o| {
        o.eq_ignore_ascii_case("No") || o.eq_ignore_ascii_case("Down")
    });
    let (yes_idx, no_idx) = match (yes_idx, no_idx) {
        (Some(y), Some(n)) => (y, n),
        _ if outcomes.len() == 2 => (0, 1),
        _ => {
            let q = v.get("question").and_then(|q| q.as_str()).unwrap_or("?").to_string();
            return Err(Rejection::NoOutcomes(q, outcomes));
        }
    };
    let (Some(yes_token_id), Some(no_token_id)) = (token_ids.get(yes_idx), token_ids.get(no_idx)) else {
        return Err(Rejection::NoTokens);
    };

    if number(v, "volume24hr").unwrap_or(0.0) < min_volume_24h {
        return Err(Rejection::LowVolume);
    }

    let id = v.get("conditionId").and_then(|s| s.as_str()).unwrap_or("").to_string();
    if id.is_empty() {
        return Err(Rejection::NoTokens);
    }

    let question = v
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or("")
        .to_string();

    let end_date_iso = v
        .get("endDateIso")
        .and_then(|e| e.as_str())
        .map(|s| s.to_string());

    let category = v
        .get("category")
        .and_then(|c| c.as_str())
        .or_else(|| {
            v.get("events")
                .and_then(|e| e.as_array())
                .and_then(|a| a.first())
                .and_then(|e| e.get("category"))
                .and_then(|c| c.as_str())
        })
        .map(parse_category_str)
        .unwrap_or(Category::Other);

    Ok(Market {
        id,
        question,
        category,
        end_date_iso,
        total_volume: number(v, "volume"),
        yes_token_id: yes_token_id.clone(),
        no_token_id: no_token_id.clone(),
    })
}

/// Parse one Gamma market object; `None` when it fails a catalog filter.
pub fn parse_gamma_market(v: &serde_json::Value, min_volume_24h: f64) -> Option<Market> {
    parse_gamma_market_checked(v, min_volume_24h).ok()
}

pub fn parse_category_str(s: &str) -> Category {
    Category::parse_lenient(s)
}
