// ─────────────────────────────────────────────────────────────────────────────
// fields.rs — Permissive accessors for the venue's JSON
//
// The venue is loose with shapes: numeric fields arrive as numbers or as
// strings, the same value hides under several aliases, position entries are
// sometimes wrapped in a single-key object, and allMids is either a flat
// map or nested under "mids". Every consumer in this crate goes through
// these helpers instead of trusting one shape.
// ─────────────────────────────────────────────────────────────────────────────
use serde_json::Value;
use std::collections::HashMap;

/// Best-effort numeric read of a single value: JSON number, or a string
/// that parses as f64. Everything else is 0.0.
pub fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Reads a numeric field trying each alias in order. The first alias that
/// is present and non-null wins, even if it coerces to 0.0.
pub fn num(obj: &Value, aliases: &[&str]) -> f64 {
    opt_num(obj, aliases).unwrap_or(0.0)
}

/// Like [`num`] but distinguishes "absent" from "present as zero".
pub fn opt_num(obj: &Value, aliases: &[&str]) -> Option<f64> {
    for key in aliases {
        match obj.get(key) {
            Some(Value::Null) | None => continue,
            Some(v) => return Some(as_f64(v)),
        }
    }
    None
}

/// Reads a string field trying each alias in order.
pub fn text<'a>(obj: &'a Value, aliases: &[&str]) -> Option<&'a str> {
    for key in aliases {
        if let Some(s) = obj.get(key).and_then(|v| v.as_str()) {
            return Some(s);
        }
    }
    None
}

/// The venue wraps position entries as {"position": {...}} in some
/// responses and sends the object bare in others. Unwrap one layer of
/// single-key indirection; anything else passes through untouched.
pub fn unwrap_entry(entry: &Value) -> &Value {
    if let Some(inner) = entry.get("position") {
        return inner;
    }
    if let Some(map) = entry.as_object() {
        if map.len() == 1 {
            if let Some((_, inner)) = map.iter().next() {
                if inner.is_object() {
                    return inner;
                }
            }
        }
    }
    entry
}

/// Extracts {coin → signed size} from a clearinghouseState response.
/// Entries without a coin name are skipped; sizes coerce permissively.
pub fn positions_from_state(state: &Value) -> HashMap<String, f64> {
    let mut positions = HashMap::new();
    let list = match state.get("assetPositions").and_then(|v| v.as_array()) {
        Some(l) => l,
        None => return positions,
    };
    for entry in list {
        let pos = unwrap_entry(entry);
        let coin = match text(pos, &["coin"]) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => continue,
        };
        positions.insert(coin, num(pos, &["szi", "sz", "size"]));
    }
    positions
}

/// Extracts {coin → mid price} from an allMids response, which is either
/// a flat {coin: "price"} map or the same map under a "mids" key.
pub fn mids_from_response(resp: &Value) -> HashMap<String, f64> {
    let map = match resp.get("mids") {
        Some(inner) if inner.is_object() => inner,
        _ => resp,
    };
    let mut mids = HashMap::new();
    if let Some(obj) = map.as_object() {
        for (coin, px) in obj {
            mids.insert(coin.clone(), as_f64(px));
        }
    }
    mids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_f64_coerces_numbers_and_strings() {
        assert_eq!(as_f64(&json!(1.5)), 1.5);
        assert_eq!(as_f64(&json!("2.75")), 2.75);
        assert_eq!(as_f64(&json!(" -3 ")), -3.0);
        assert_eq!(as_f64(&json!("garbage")), 0.0);
        assert_eq!(as_f64(&json!(null)), 0.0);
        assert_eq!(as_f64(&json!([1])), 0.0);
    }

    #[test]
    fn test_num_walks_aliases_in_order() {
        let v = json!({"fundingRate": "0.0002", "oi": 5});
        assert_eq!(num(&v, &["funding", "fundingRate", "fundingRateHourly"]), 0.0002);
        assert_eq!(num(&v, &["openInterest", "openInterestUsd", "oi"]), 5.0);
        assert_eq!(num(&v, &["missing"]), 0.0);
    }

    #[test]
    fn test_opt_num_first_present_alias_wins_even_at_zero() {
        let v = json!({"usd": "0", "px": "100"});
        assert_eq!(opt_num(&v, &["usd"]), Some(0.0));
        assert_eq!(opt_num(&v, &["notional"]), None);
        // null is treated as absent
        let v = json!({"usd": null, "px": "100"});
        assert_eq!(opt_num(&v, &["usd", "px"]), Some(100.0));
    }

    #[test]
    fn test_unwrap_entry_handles_both_shapes() {
        let wrapped = json!({"position": {"coin": "ETH", "szi": "1.5"}});
        let bare = json!({"coin": "ETH", "szi": "1.5"});
        assert_eq!(unwrap_entry(&wrapped)["coin"], "ETH");
        assert_eq!(unwrap_entry(&bare)["coin"], "ETH");
        // single-key wrapper with an arbitrary key also unwraps
        let odd = json!({"p": {"coin": "SOL", "szi": -2}});
        assert_eq!(unwrap_entry(&odd)["coin"], "SOL");
    }

    #[test]
    fn test_positions_from_state_skips_nameless_entries() {
        let state = json!({"assetPositions": [
            {"position": {"coin": "ETH", "szi": "100"}},
            {"coin": "SOL", "szi": -20},
            {"position": {"szi": "7"}},
        ]});
        let positions = positions_from_state(&state);
        assert_eq!(positions.len(), 2);
        assert_eq!(positions["ETH"], 100.0);
        assert_eq!(positions["SOL"], -20.0);
    }

    #[test]
    fn test_positions_from_state_tolerates_missing_list() {
        assert!(positions_from_state(&json!({})).is_empty());
        assert!(positions_from_state(&json!({"assetPositions": "nope"})).is_empty());
    }

    #[test]
    fn test_mids_flat_and_wrapped() {
        let flat = json!({"ETH": "3000.5", "SOL": "150"});
        let wrapped = json!({"mids": {"ETH": "3000.5", "SOL": "150"}});
        for resp in [flat, wrapped] {
            let mids = mids_from_response(&resp);
            assert_eq!(mids["ETH"], 3000.5);
            assert_eq!(mids["SOL"], 150.0);
        }
    }
}
