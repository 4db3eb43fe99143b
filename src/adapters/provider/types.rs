//! Provider Response Types
//!
//! Wire DTOs for each provider's JSON responses and their decoding into
//! `TokenRecord`s. Decoders accept the shapes returned by the listing,
//! single-token and multi-token endpoints of each API.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

use crate::domain::{
    Address, BirdeyeFields, DexScreenerFields, GeckoTerminalFields, Provider, ProviderPayload, RiskItem,
    RiskSeverity, RugCheckFields, TokenRecord,
};

/// Decode a response body into records for `provider`
pub fn decode(provider: Provider, body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<TokenRecord>, String> {
    match provider {
        Provider::DexScreener => decode_dexscreener(body, fetched_at),
        Provider::GeckoTerminal => decode_geckoterminal(body, fetched_at),
        Provider::Birdeye => decode_birdeye(body, fetched_at),
        Provider::RugCheck => decode_rugcheck(body, fetched_at),
    }
}

/// Numbers some APIs send as JSON strings
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Str(s)) => s.trim().parse::<f64>().ok(),
        None => None,
    })
}

fn from_unix(ts: Option<i64>) -> Option<DateTime<Utc>> {
    let ts = ts?;
    // Millisecond timestamps are 13 digits
    if ts > 10_000_000_000 {
        Utc.timestamp_millis_opt(ts).single()
    } else {
        Utc.timestamp_opt(ts, 0).single()
    }
}

// ============================================================================
// DexScreener
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DexPairsResponse {
    Wrapped { pairs: Option<Vec<DexPair>> },
    Bare(Vec<DexPair>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexPair {
    base_token: DexToken,
    #[serde(default, deserialize_with = "lenient_f64")]
    price_usd: Option<f64>,
    liquidity: Option<DexLiquidity>,
    volume: Option<DexWindows>,
    price_change: Option<DexWindows>,
    txns: Option<DexTxns>,
    #[serde(default, deserialize_with = "lenient_f64")]
    fdv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap: Option<f64>,
    pair_created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DexToken {
    address: String,
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DexLiquidity {
    #[serde(default, deserialize_with = "lenient_f64")]
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DexWindows {
    #[serde(default, deserialize_with = "lenient_f64")]
    h24: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    h6: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DexTxns {
    h24: Option<DexTxnCount>,
}

#[derive(Debug, Deserialize)]
struct DexTxnCount {
    buys: Option<u64>,
    sells: Option<u64>,
}

fn decode_dexscreener(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<TokenRecord>, String> {
    let response: DexPairsResponse =
        serde_json::from_slice(body).map_err(|e| format!("Failed to parse DexScreener pairs: {}", e))?;
    let pairs = match response {
        DexPairsResponse::Wrapped { pairs } => pairs.unwrap_or_default(),
        DexPairsResponse::Bare(pairs) => pairs,
    };

    // A token trades in several pairs; keep its deepest pair
    let mut best: HashMap<Address, DexPair> = HashMap::new();
    for pair in pairs {
        let Some(address) = Address::normalize(&pair.base_token.address) else {
            continue;
        };
        let liquidity = |p: &DexPair| p.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
        let deeper = best
            .get(&address)
            .map_or(true, |existing| liquidity(&pair) > liquidity(existing));
        if deeper {
            best.insert(address, pair);
        }
    }

    let mut records: Vec<TokenRecord> = best
        .into_iter()
        .map(|(address, pair)| {
            let (buys, sells) = pair
                .txns
                .as_ref()
                .and_then(|t| t.h24.as_ref())
                .map(|c| (c.buys, c.sells))
                .unwrap_or((None, None));
            let fields = DexScreenerFields {
                symbol: pair.base_token.symbol,
                name: pair.base_token.name,
                price_usd: pair.price_usd,
                liquidity_usd: pair.liquidity.and_then(|l| l.usd),
                volume_24h: pair.volume.as_ref().and_then(|v| v.h24),
                volume_6h: pair.volume.as_ref().and_then(|v| v.h6),
                price_change_24h: pair.price_change.and_then(|p| p.h24),
                buys_24h: buys,
                sells_24h: sells,
                market_cap: pair.market_cap,
                fdv: pair.fdv,
                pair_created_at: from_unix(pair.pair_created_at),
            };
            TokenRecord::new(address, ProviderPayload::DexScreener(fields), fetched_at)
        })
        .collect();
    records.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(records)
}

// ============================================================================
// GeckoTerminal (JSON:API)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeckoResponse {
    Many { data: Vec<GeckoResource> },
    One { data: GeckoResource },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum GeckoResource {
    Pool {
        attributes: GeckoPoolAttributes,
        relationships: Option<GeckoRelationships>,
    },
    Token {
        attributes: GeckoTokenAttributes,
    },
}

#[derive(Debug, Deserialize)]
struct GeckoPoolAttributes {
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    base_token_price_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    reserve_in_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    fdv_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap_usd: Option<f64>,
    volume_usd: Option<GeckoWindows>,
    price_change_percentage: Option<GeckoWindows>,
    transactions: Option<GeckoTransactions>,
    pool_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GeckoTokenAttributes {
    address: String,
    symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    price_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_reserve_in_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    fdv_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap_usd: Option<f64>,
    volume_usd: Option<GeckoWindows>,
}

#[derive(Debug, Deserialize)]
struct GeckoWindows {
    #[serde(default, deserialize_with = "lenient_f64")]
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GeckoTransactions {
    h24: Option<GeckoTxnCount>,
}

#[derive(Debug, Deserialize)]
struct GeckoTxnCount {
    buys: Option<u64>,
    sells: Option<u64>,
    buyers: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeckoRelationships {
    base_token: Option<GeckoRelation>,
}

#[derive(Debug, Deserialize)]
struct GeckoRelation {
    data: GeckoRelationData,
}

#[derive(Debug, Deserialize)]
struct GeckoRelationData {
    /// `<network>_<address>`
    id: String,
}

fn gecko_token_address(relationships: &Option<GeckoRelationships>) -> Option<Address> {
    let id = &relationships.as_ref()?.base_token.as_ref()?.data.id;
    let raw = id.split_once('_').map(|(_, addr)| addr).unwrap_or(id);
    Address::normalize(raw)
}

fn decode_geckoterminal(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<TokenRecord>, String> {
    let response: GeckoResponse =
        serde_json::from_slice(body).map_err(|e| format!("Failed to parse GeckoTerminal response: {}", e))?;
    let resources = match response {
        GeckoResponse::Many { data } => data,
        GeckoResponse::One { data } => vec![data],
    };

    let mut records: Vec<TokenRecord> = Vec::new();
    for resource in resources {
        let (address, fields) = match resource {
            GeckoResource::Pool {
                attributes,
                relationships,
            } => {
                let Some(address) = gecko_token_address(&relationships) else {
                    continue;
                };
                let txns = attributes.transactions.and_then(|t| t.h24);
                let symbol = attributes
                    .name
                    .as_deref()
                    .and_then(|n| n.split('/').next())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                let fields = GeckoTerminalFields {
                    symbol,
                    price_usd: attributes.base_token_price_usd,
                    reserve_usd: attributes.reserve_in_usd,
                    volume_24h: attributes.volume_usd.and_then(|v| v.h24),
                    fdv_usd: attributes.fdv_usd,
                    market_cap_usd: attributes.market_cap_usd,
                    price_change_24h: attributes.price_change_percentage.and_then(|p| p.h24),
                    buys_24h: txns.as_ref().and_then(|t| t.buys),
                    sells_24h: txns.as_ref().and_then(|t| t.sells),
                    buyers_24h: txns.as_ref().and_then(|t| t.buyers),
                    pool_created_at: attributes.pool_created_at,
                };
                (address, fields)
            }
            GeckoResource::Token { attributes } => {
                let Some(address) = Address::normalize(&attributes.address) else {
                    continue;
                };
                let fields = GeckoTerminalFields {
                    symbol: attributes.symbol,
                    price_usd: attributes.price_usd,
                    reserve_usd: attributes.total_reserve_in_usd,
                    volume_24h: attributes.volume_usd.and_then(|v| v.h24),
                    fdv_usd: attributes.fdv_usd,
                    market_cap_usd: attributes.market_cap_usd,
                    ..Default::default()
                };
                (address, fields)
            }
        };

        // Pools arrive deepest-first; keep the first pool per token
        if records.iter().any(|r| r.address == address) {
            continue;
        }
        records.push(TokenRecord::new(address, ProviderPayload::GeckoTerminal(fields), fetched_at));
    }
    Ok(records)
}

// ============================================================================
// Birdeye
// ============================================================================

#[derive(Debug, Deserialize)]
struct BirdeyeEnvelope {
    success: Option<bool>,
    message: Option<String>,
    data: Option<BirdeyeData>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BirdeyeData {
    List {
        #[serde(alias = "tokens")]
        items: Vec<BirdeyeToken>,
    },
    One(BirdeyeOverview),
    Map(HashMap<String, Option<BirdeyeToken>>),
}

/// Single-token payload; requires `address` so maps are not mistaken for it
#[derive(Debug, Deserialize)]
struct BirdeyeOverview {
    address: String,
    #[serde(flatten)]
    token: BirdeyeToken,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BirdeyeToken {
    address: Option<String>,
    symbol: Option<String>,
    name: Option<String>,
    #[serde(default, alias = "value", deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    liquidity: Option<f64>,
    #[serde(default, rename = "v24hUSD", alias = "volume24hUSD", deserialize_with = "lenient_f64")]
    v24h_usd: Option<f64>,
    #[serde(default, rename = "v24hChangePercent", deserialize_with = "lenient_f64")]
    v24h_change_percent: Option<f64>,
    #[serde(default, alias = "marketCap", deserialize_with = "lenient_f64")]
    mc: Option<f64>,
    holder: Option<u64>,
    #[serde(rename = "buy24h")]
    buy_24h: Option<u64>,
    #[serde(rename = "sell24h")]
    sell_24h: Option<u64>,
    #[serde(rename = "uniqueWallet24h")]
    unique_wallet_24h: Option<u64>,
    #[serde(default, rename = "priceChange24hPercent", alias = "priceChange24h", deserialize_with = "lenient_f64")]
    price_change_24h_percent: Option<f64>,
    #[serde(default, rename = "vBuy24hUSD", deserialize_with = "lenient_f64")]
    v_buy_24h_usd: Option<f64>,
    #[serde(default, rename = "vSell24hUSD", deserialize_with = "lenient_f64")]
    v_sell_24h_usd: Option<f64>,
    #[serde(default, rename = "top10HolderPercent", deserialize_with = "lenient_f64")]
    top10_holder_percent: Option<f64>,
    #[serde(alias = "listingTime", alias = "creationTime")]
    created_at: Option<i64>,
}

impl BirdeyeToken {
    fn into_fields(self) -> BirdeyeFields {
        BirdeyeFields {
            symbol: self.symbol,
            name: self.name,
            price: self.price,
            liquidity: self.liquidity,
            volume_24h_usd: self.v24h_usd,
            volume_24h_change_pct: self.v24h_change_percent,
            market_cap: self.mc,
            holder_count: self.holder,
            buy_24h: self.buy_24h,
            sell_24h: self.sell_24h,
            unique_wallet_24h: self.unique_wallet_24h,
            price_change_24h_pct: self.price_change_24h_percent,
            buy_volume_24h_usd: self.v_buy_24h_usd,
            sell_volume_24h_usd: self.v_sell_24h_usd,
            top10_holder_pct: self.top10_holder_percent,
            created_at: from_unix(self.created_at),
        }
    }
}

fn decode_birdeye(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<TokenRecord>, String> {
    let envelope: BirdeyeEnvelope =
        serde_json::from_slice(body).map_err(|e| format!("Failed to parse Birdeye response: {}", e))?;
    if envelope.success == Some(false) {
        return Err(format!(
            "Birdeye reported failure: {}",
            envelope.message.unwrap_or_else(|| "no message".into())
        ));
    }

    let tokens: Vec<(Option<String>, BirdeyeToken)> = match envelope.data {
        None => Vec::new(),
        Some(BirdeyeData::List { items }) => items.into_iter().map(|t| (t.address.clone(), t)).collect(),
        Some(BirdeyeData::One(overview)) => vec![(Some(overview.address), overview.token)],
        Some(BirdeyeData::Map(map)) => map
            .into_iter()
            .filter_map(|(addr, token)| token.map(|t| (Some(addr), t)))
            .collect(),
    };

    let mut records: Vec<TokenRecord> = tokens
        .into_iter()
        .filter_map(|(raw, token)| {
            let address = Address::normalize(raw.as_deref()?)?;
            Some(TokenRecord::new(
                address,
                ProviderPayload::Birdeye(token.into_fields()),
                fetched_at,
            ))
        })
        .collect();
    records.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(records)
}

// ============================================================================
// RugCheck
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RugCheckReport {
    mint: String,
    #[serde(default)]
    risks: Vec<RugCheckRisk>,
    #[serde(default, rename = "score_normalised", deserialize_with = "lenient_f64")]
    score_normalised: Option<f64>,
    mint_authority: Option<String>,
    freeze_authority: Option<String>,
    #[serde(default)]
    top_holders: Vec<RugCheckHolder>,
    #[serde(default)]
    markets: Vec<RugCheckMarket>,
    total_holders: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RugCheckRisk {
    name: String,
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RugCheckHolder {
    #[serde(default, deserialize_with = "lenient_f64")]
    pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RugCheckMarket {
    lp: Option<RugCheckLp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RugCheckLp {
    #[serde(default, deserialize_with = "lenient_f64")]
    lp_locked_pct: Option<f64>,
}

fn severity(level: Option<&str>) -> RiskSeverity {
    match level.map(str::to_ascii_lowercase).as_deref() {
        Some("danger") | Some("error") => RiskSeverity::Danger,
        Some("warn") | Some("warning") => RiskSeverity::Warn,
        _ => RiskSeverity::Info,
    }
}

fn decode_rugcheck(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<TokenRecord>, String> {
    let report: RugCheckReport =
        serde_json::from_slice(body).map_err(|e| format!("Failed to parse RugCheck report: {}", e))?;
    let address = Address::normalize(&report.mint).ok_or_else(|| "RugCheck report without mint".to_string())?;

    let top10_holder_pct = if report.top_holders.is_empty() {
        None
    } else {
        Some(report.top_holders.iter().take(10).filter_map(|h| h.pct).sum())
    };
    let lp_locked_pct = report
        .markets
        .iter()
        .filter_map(|m| m.lp.as_ref().and_then(|lp| lp.lp_locked_pct))
        .fold(None, |acc: Option<f64>, pct| Some(acc.map_or(pct, |a| a.max(pct))));

    let fields = RugCheckFields {
        risk_score: report.score_normalised,
        risks: report
            .risks
            .into_iter()
            .map(|r| RiskItem {
                level: severity(r.level.as_deref()),
                name: r.name,
            })
            .collect(),
        mint_authority: report.mint_authority.filter(|a| !a.is_empty()),
        freeze_authority: report.freeze_authority.filter(|a| !a.is_empty()),
        top10_holder_pct,
        lp_locked_pct,
        holder_count: report.total_holders,
    };
    Ok(vec![TokenRecord::new(address, ProviderPayload::RugCheck(fields), fetched_at)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Label, Metric};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_dexscreener_keeps_deepest_pair() {
        let body = br#"{"pairs":[
            {"baseToken":{"address":"MintA","symbol":"AAA","name":"Alpha"},
             "priceUsd":"0.0012","liquidity":{"usd":5000},"volume":{"h24":900,"h6":300},
             "txns":{"h24":{"buys":40,"sells":10}},"pairCreatedAt":1773480000000},
            {"baseToken":{"address":"MintA","symbol":"AAA"},
             "priceUsd":"0.0013","liquidity":{"usd":80000},"volume":{"h24":12000,"h6":4500},
             "priceChange":{"h24":35.5},"marketCap":250000}
        ]}"#;
        let records = decode(Provider::DexScreener, body, now()).unwrap();
        assert_eq!(records.len(), 1);
        let fields = records[0].fields();
        assert_eq!(records[0].address.as_str(), "MintA");
        assert_eq!(fields.metrics[&Metric::LiquidityUsd], 80_000.0);
        assert_eq!(fields.metrics[&Metric::PriceUsd], 0.0013);
        assert_eq!(fields.metrics[&Metric::MarketCapUsd], 250_000.0);
        // 4500 * 4 / 12000 - 1 = +50%
        approx::assert_relative_eq!(fields.metrics[&Metric::VolumeChange24hPct], 50.0);
    }

    #[test]
    fn test_dexscreener_bare_array_and_null_pairs() {
        let bare = br#"[{"baseToken":{"address":"x"},"liquidity":{"usd":1}}]"#;
        assert_eq!(decode(Provider::DexScreener, bare, now()).unwrap().len(), 1);

        let empty = br#"{"schemaVersion":"1.0.0","pairs":null}"#;
        assert!(decode(Provider::DexScreener, empty, now()).unwrap().is_empty());
    }

    #[test]
    fn test_geckoterminal_pools() {
        let body = br#"{"data":[{
            "id":"solana_pool1","type":"pool",
            "attributes":{"name":"BONK / SOL","base_token_price_usd":"0.00002",
                "reserve_in_usd":"150000.5","fdv_usd":"900000","market_cap_usd":null,
                "volume_usd":{"h24":"42000"},"price_change_percentage":{"h24":"-3.2"},
                "transactions":{"h24":{"buys":120,"sells":80,"buyers":95}},
                "pool_created_at":"2026-03-13T12:00:00Z"},
            "relationships":{"base_token":{"data":{"id":"solana_BonkMint","type":"token"}}}
        }]}"#;
        let records = decode(Provider::GeckoTerminal, body, now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address.as_str(), "BonkMint");
        let fields = records[0].fields();
        assert_eq!(fields.metrics[&Metric::LiquidityUsd], 150_000.5);
        assert_eq!(fields.metrics[&Metric::MarketCapUsd], 900_000.0);
        assert_eq!(fields.metrics[&Metric::Trades24h], 200.0);
        assert_eq!(fields.labels[&Label::Symbol], "BONK");
        approx::assert_relative_eq!(fields.metrics[&Metric::AgeHours], 24.0);
    }

    #[test]
    fn test_birdeye_overview_and_multi() {
        let overview = br#"{"success":true,"data":{"address":"Tok1","symbol":"T1","liquidity":55000,
            "v24hUSD":7000,"holder":1200,"buy24h":300,"sell24h":150,"vBuy24hUSD":4500,"vSell24hUSD":2500}}"#;
        let records = decode(Provider::Birdeye, overview, now()).unwrap();
        assert_eq!(records.len(), 1);
        let fields = records[0].fields();
        assert_eq!(fields.metrics[&Metric::HolderCount], 1200.0);
        assert_eq!(fields.metrics[&Metric::BuyVolume24hUsd], 4500.0);

        let multi = br#"{"success":true,"data":{"Tok1":{"value":0.5,"liquidity":1000},"Tok2":null}}"#;
        let records = decode(Provider::Birdeye, multi, now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address.as_str(), "Tok1");
    }

    #[test]
    fn test_birdeye_failure_envelope() {
        let body = br#"{"success":false,"message":"Unauthorized"}"#;
        let err = decode(Provider::Birdeye, body, now()).unwrap_err();
        assert!(err.contains("Unauthorized"));
    }

    #[test]
    fn test_rugcheck_report() {
        let body = br#"{"mint":"RugMint","score_normalised":38,
            "risks":[{"name":"Low Liquidity","level":"warn"},{"name":"Mutable metadata","level":"info"}],
            "mintAuthority":null,"freezeAuthority":"Frz111",
            "topHolders":[{"pct":12.5},{"pct":7.5}],
            "markets":[{"lp":{"lpLockedPct":80.0}},{"lp":{"lpLockedPct":95.5}}],
            "totalHolders":640}"#;
        let records = decode(Provider::RugCheck, body, now()).unwrap();
        let fields = records[0].fields();
        assert_eq!(fields.metrics[&Metric::RiskScore], 38.0);
        assert_eq!(fields.metrics[&Metric::Top10HolderPct], 20.0);
        assert_eq!(fields.metrics[&Metric::LpLockedPct], 95.5);
        assert_eq!(fields.labels[&Label::MintAuthority], "revoked");
        assert_eq!(fields.labels[&Label::FreezeAuthority], "active");
        assert_eq!(fields.labels[&Label::RiskLevel], "warn");
        assert_eq!(fields.labels[&Label::RiskFlags], "Low Liquidity,Mutable metadata");
    }

    #[test]
    fn test_malformed_body_is_error() {
        assert!(decode(Provider::RugCheck, b"<html>", now()).is_err());
        assert!(decode(Provider::GeckoTerminal, b"{}", now()).is_err());
    }
}
