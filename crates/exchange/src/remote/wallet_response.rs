use serde::Deserialize;

/// `GET /v5/account/wallet-balance` payload (unified account).
#[derive(Debug, Deserialize)]
pub struct WalletResult {
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
pub struct WalletAccount {
    pub coin: Vec<CoinBalance>,
}

#[derive(Debug, Deserialize)]
pub struct CoinBalance {
    pub coin: String,
    #[serde(rename = "walletBalance")]
    pub wallet_balance: String,
}

impl WalletResult {
    pub fn balance_of(&self, asset: &str) -> Option<&str> {
        self.list
            .iter()
            .flat_map(|account| account.coin.iter())
            .find(|c| c.coin == asset)
            .map(|c| c.wallet_balance.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_requested_coin() {
        let json = r#"{
            "list": [{
                "coin": [
                    {"coin": "BTC", "walletBalance": "0.5"},
                    {"coin": "USDT", "walletBalance": "1234.56"}
                ]
            }]
        }"#;
        let result: WalletResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.balance_of("USDT"), Some("1234.56"));
        assert_eq!(result.balance_of("ETH"), None);
    }
}
