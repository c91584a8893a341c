use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Web citations from a provider `groundingMetadata` object. Chunks missing
/// either a uri or a title are dropped; order is preserved.
pub fn citations_from_grounding(metadata: &Value) -> Vec<Citation> {
    metadata
        .get("groundingChunks")
        .and_then(Value::as_array)
        .map(|chunks| chunks.iter().filter_map(citation_from_chunk).collect())
        .unwrap_or_default()
}

fn citation_from_chunk(chunk: &Value) -> Option<Citation> {
    let web = chunk.get("web")?;
    let uri = non_empty_str(web.get("uri"))?;
    let title = non_empty_str(web.get("title"))?;
    Some(Citation {
        uri: uri.to_string(),
        title: title.to_string(),
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldPriceSnapshot {
    pub price_per_ounce_usd: f64,
    pub price_per_gram_usd: f64,
    pub last_updated: String,
}

/// Extracts a price snapshot from a model answer that was asked to reply
/// with a JSON object. Tolerates prose or code fences around the object and
/// numbers rendered as strings such as `"$2,345.10"`.
pub fn parse_gold_price(answer: &str) -> Option<GoldPriceSnapshot> {
    answer
        .match_indices('{')
        .filter_map(|(start, _)| {
            serde_json::Deserializer::from_str(&answer[start..])
                .into_iter::<Value>()
                .next()?
                .ok()
        })
        .find_map(|candidate| snapshot_from(&candidate))
}

fn snapshot_from(parsed: &Value) -> Option<GoldPriceSnapshot> {
    let ounce = price_field(parsed, &["pricePerOunce", "price_per_ounce", "ounce"])?;
    let gram = price_field(parsed, &["pricePerGram", "price_per_gram", "gram"])?;
    let last_updated = ["lastUpdated", "last_updated", "updatedAt"]
        .iter()
        .find_map(|key| non_empty_str(parsed.get(*key)))
        .unwrap_or("unknown")
        .to_string();
    Some(GoldPriceSnapshot {
        price_per_ounce_usd: ounce,
        price_per_gram_usd: gram,
        last_updated,
    })
}

fn price_field(obj: &Value, keys: &[&str]) -> Option<f64> {
    let value = keys.iter().find_map(|key| obj.get(*key))?;
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => {
            let cleaned: String = text
                .chars()
                .filter(|ch| ch.is_ascii_digit() || *ch == '.')
                .collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    (number.is_finite() && number > 0.0).then_some(number)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{citations_from_grounding, parse_gold_price, Citation};

    #[test]
    fn citations_missing_uri_or_title_are_dropped() {
        let metadata = json!({
            "groundingChunks": [
                {"web": {"uri": "a", "title": ""}},
                {"web": {"uri": "b", "title": "T"}}
            ]
        });
        assert_eq!(
            citations_from_grounding(&metadata),
            vec![Citation {
                uri: "b".to_string(),
                title: "T".to_string()
            }]
        );
    }

    #[test]
    fn non_web_chunks_and_missing_metadata_yield_nothing() {
        assert!(citations_from_grounding(&json!({})).is_empty());
        assert!(citations_from_grounding(&json!({"groundingChunks": [{"retrievedContext": {}}]})).is_empty());
    }

    #[test]
    fn gold_price_parses_fenced_json_with_string_numbers() {
        let answer = "Here you go:\n```json\n{\"pricePerOunce\": \"$2,401.55\", \"pricePerGram\": 77.21, \"lastUpdated\": \"2026-10-18 09:00 UTC\"}\n```";
        let snapshot = parse_gold_price(answer).unwrap();
        assert_eq!(snapshot.price_per_ounce_usd, 2401.55);
        assert_eq!(snapshot.price_per_gram_usd, 77.21);
        assert_eq!(snapshot.last_updated, "2026-10-18 09:00 UTC");
    }

    #[test]
    fn gold_price_skips_braces_in_leading_prose() {
        let answer = "You asked for {\"pricePerOunce\": number, \"pricePerGram\": number}. \
Today: {\"pricePerOunce\": 2400.5, \"pricePerGram\": 77.18, \"lastUpdated\": \"noon\"} {trailing}";
        let snapshot = parse_gold_price(answer).unwrap();
        assert_eq!(snapshot.price_per_ounce_usd, 2400.5);
        assert_eq!(snapshot.price_per_gram_usd, 77.18);
        assert_eq!(snapshot.last_updated, "noon");
    }

    #[test]
    fn gold_price_requires_both_positive_prices() {
        assert!(parse_gold_price("{\"pricePerOunce\": 2400}").is_none());
        assert!(parse_gold_price("{\"pricePerOunce\": 0, \"pricePerGram\": 70}").is_none());
        assert!(parse_gold_price("no json here").is_none());
    }
}
