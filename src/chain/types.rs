//! Provider-neutral transfer records
//!
//! Chain API providers disagree on field names. Everything downstream of the
//! client sees only [`TransferRecord`].

use serde_json::Value;
use tracing::warn;

use super::error::ChainError;

/// One token transfer as reported by the chain API, unfiltered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub tx_id: String,
    pub to_address: String,
    pub token_contract: String,
    /// Integer amount in the token's smallest unit, as a decimal string
    pub raw_value: String,
    pub confirmed: bool,
}

const TX_ID_FIELDS: &[&str] = &["transaction_id", "txID", "txid", "tx_id", "hash"];
const TO_FIELDS: &[&str] = &["to", "to_address", "toAddress"];
const VALUE_FIELDS: &[&str] = &["value", "amount", "quant"];
const CONTRACT_FIELDS: &[&str] = &["contract_address", "token_address", "contract"];

/// Parse a transfer-list response. Accepts `{"data": [...]}` or a bare array.
pub fn normalize_transfers(
    body: &Value,
    min_confirmations: u64,
) -> Result<Vec<TransferRecord>, ChainError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown provider error");
        return Err(ChainError::Decode(format!(
            "provider reported failure: {}",
            reason
        )));
    }

    let items = match body {
        Value::Array(items) => items,
        _ => body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ChainError::Decode("response has no transfer list".into()))?,
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            let record = normalize_transfer(item, min_confirmations);
            if record.is_none() {
                warn!(item = %item, "Dropping transfer with missing tx id, destination or value");
            }
            record
        })
        .collect())
}

/// Normalize one transfer object; `None` if a required field is missing
pub fn normalize_transfer(item: &Value, min_confirmations: u64) -> Option<TransferRecord> {
    let tx_id = string_field(item, TX_ID_FIELDS)?;
    let to_address = string_field(item, TO_FIELDS)?;
    let raw_value = string_field(item, VALUE_FIELDS)?;
    let token_contract = item
        .get("token_info")
        .and_then(|info| info.get("address"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| string_field(item, CONTRACT_FIELDS))
        .unwrap_or_default();

    // The query asks for confirmed transfers only; an explicit flag or
    // confirmation count overrides that assumption.
    let confirmed = match item.get("confirmed").and_then(Value::as_bool) {
        Some(flag) => flag,
        None => item
            .get("confirmations")
            .and_then(Value::as_u64)
            .map(|n| n >= min_confirmations)
            .unwrap_or(true),
    };

    Some(TransferRecord {
        tx_id,
        to_address,
        token_contract,
        raw_value,
        confirmed,
    })
}

/// Transaction id from a broadcast response
pub fn extract_tx_id(body: &Value) -> Option<String> {
    string_field(body, TX_ID_FIELDS).or_else(|| {
        body.get("data")
            .and_then(|data| string_field(data, TX_ID_FIELDS))
    })
}

fn string_field(item: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match item.get(*name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trongrid_shape() {
        let body = json!({
            "data": [{
                "transaction_id": "abc",
                "token_info": {"symbol": "USDT", "address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", "decimals": 6},
                "from": "TFrom",
                "to": "TWallet",
                "type": "Transfer",
                "value": "5000000"
            }],
            "success": true
        });

        let records = normalize_transfers(&body, 19).unwrap();
        assert_eq!(
            records,
            vec![TransferRecord {
                tx_id: "abc".into(),
                to_address: "TWallet".into(),
                token_contract: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".into(),
                raw_value: "5000000".into(),
                confirmed: true,
            }]
        );
    }

    #[test]
    fn test_alternate_field_names() {
        let body = json!([{
            "hash": "def",
            "to_address": "TWallet",
            "amount": 1200,
            "contract_address": "TToken",
            "confirmations": 3
        }]);

        let records = normalize_transfers(&body, 19).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tx_id, "def");
        assert_eq!(records[0].raw_value, "1200");
        assert_eq!(records[0].token_contract, "TToken");
        assert!(!records[0].confirmed);
    }

    #[test]
    fn test_explicit_unconfirmed_flag() {
        let item = json!({"txID": "x", "to": "T", "value": "1", "confirmed": false});
        assert!(!normalize_transfer(&item, 0).unwrap().confirmed);
    }

    #[test]
    fn test_incomplete_records_dropped() {
        let body = json!({"data": [
            {"to": "TWallet", "value": "1"},
            {"transaction_id": "ok", "to": "TWallet", "value": "1"}
        ]});

        let records = normalize_transfers(&body, 19).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tx_id, "ok");
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            normalize_transfers(&json!({"unexpected": 1}), 19),
            Err(ChainError::Decode(_))
        ));
        assert!(matches!(
            normalize_transfers(&json!({"success": false, "error": "rate limited"}), 19),
            Err(ChainError::Decode(_))
        ));
    }

    #[test]
    fn test_extract_tx_id() {
        assert_eq!(extract_tx_id(&json!({"txid": "t1"})), Some("t1".into()));
        assert_eq!(
            extract_tx_id(&json!({"data": {"transaction_id": "t2"}})),
            Some("t2".into())
        );
        assert_eq!(extract_tx_id(&json!({"result": true})), None);
    }
}
