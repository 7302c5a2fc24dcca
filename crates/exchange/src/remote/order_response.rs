use serde::Deserialize;

/// `POST /v5/order/create` payload: the exchange acknowledges with ids only;
/// execution figures come from a follow-up realtime query.
#[derive(Debug, Deserialize)]
pub struct OrderCreateResult {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "orderLinkId")]
    pub order_link_id: String,
}

/// `GET /v5/order/realtime` payload.
#[derive(Debug, Deserialize)]
pub struct OrderListResult {
    pub list: Vec<OrderEntry>,
}

#[derive(Debug, Deserialize)]
pub struct OrderEntry {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "orderStatus")]
    pub order_status: String,
    #[serde(rename = "avgPrice", default)]
    pub avg_price: String,
    #[serde(rename = "cumExecValue", default)]
    pub cum_exec_value: String,
}

impl OrderEntry {
    /// Terminal-failure statuses; anything else is pending or done.
    pub fn is_dead(&self) -> bool {
        matches!(self.order_status.as_str(), "Rejected" | "Cancelled" | "Deactivated")
    }

    pub fn is_filled(&self) -> bool {
        matches!(self.order_status.as_str(), "Filled" | "PartiallyFilledCanceled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_rows_parse_with_optional_exec_fields() {
        let json = r#"{
            "list": [{
                "orderId": "abc",
                "symbol": "BTCUSDT",
                "side": "Buy",
                "orderStatus": "New"
            }]
        }"#;
        let result: OrderListResult = serde_json::from_str(json).unwrap();
        let entry = &result.list[0];
        assert!(!entry.is_filled());
        assert!(!entry.is_dead());
        assert!(entry.avg_price.is_empty());
    }

    #[test]
    fn filled_and_dead_statuses_are_recognized() {
        let filled = OrderEntry {
            order_id: "1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: "Buy".to_string(),
            order_status: "Filled".to_string(),
            avg_price: "100".to_string(),
            cum_exec_value: "50".to_string(),
        };
        assert!(filled.is_filled());

        let rejected = OrderEntry {
            order_status: "Rejected".to_string(),
            ..filled
        };
        assert!(rejected.is_dead());
    }
}
