//! Token Records
//!
//! Core identity and observation types shared by every layer:
//! - `Address`: token address, case-insensitive for identity
//! - `Provider`: the external data sources the scout polls
//! - `TokenRecord`: one provider's observation of one token
//! - `ProviderPayload`: typed per-provider fields, normalized into the fixed
//!   `Metric` / `Label` schema by `TokenRecord::fields()`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Token address
///
/// Keeps the trimmed original spelling for outbound calls (Solana mints are
/// case-sensitive base58) and a lowercase key that drives equality, hashing
/// and ordering, so observations from providers that disagree on case still
/// correlate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    raw: String,
    key: String,
}

impl Address {
    /// Normalize a raw address. Returns `None` for blank input.
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            raw: trimmed.to_string(),
            key: trimmed.to_lowercase(),
        })
    }

    /// Original spelling, as sent to providers
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Case-folded correlation key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::normalize(&raw).ok_or_else(|| "blank token address".to_string())
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.raw
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// External data provider
///
/// Declaration order is the deterministic tie-break order used by the
/// correlator when two observations are otherwise indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    DexScreener,
    GeckoTerminal,
    Birdeye,
    RugCheck,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::DexScreener,
        Provider::GeckoTerminal,
        Provider::Birdeye,
        Provider::RugCheck,
    ];

    /// Config / log name of the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::DexScreener => "dexscreener",
            Provider::GeckoTerminal => "geckoterminal",
            Provider::Birdeye => "birdeye",
            Provider::RugCheck => "rugcheck",
        }
    }

    /// Environment variable consulted when no API key is configured
    pub fn api_key_env(&self) -> String {
        format!("{}_API_KEY", self.as_str().to_uppercase())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown provider '{}'", s))
    }
}

/// Group of fields requested together from one provider endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSet {
    /// Price, liquidity, volume
    Market,
    /// Trade counts, holder counts, longer-window trends
    Activity,
    /// Audit / risk flags, authorities
    Security,
    /// Holder distribution and large-holder activity
    Holders,
}

impl FieldSet {
    pub const ALL: [FieldSet; 4] = [
        FieldSet::Market,
        FieldSet::Activity,
        FieldSet::Security,
        FieldSet::Holders,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldSet::Market => "market",
            FieldSet::Activity => "activity",
            FieldSet::Security => "security",
            FieldSet::Holders => "holders",
        }
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Normalized schema
// ============================================================================

/// Numeric fields of the normalized schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PriceUsd,
    LiquidityUsd,
    Volume24hUsd,
    VolumeChange24hPct,
    MarketCapUsd,
    AgeHours,
    PriceChange24hPct,
    Buys24h,
    Sells24h,
    Trades24h,
    UniqueWallets24h,
    HolderCount,
    Top10HolderPct,
    BuyVolume24hUsd,
    SellVolume24hUsd,
    /// 0-100, higher is riskier
    RiskScore,
    LpLockedPct,
}

/// Categorical fields of the normalized schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Symbol,
    Name,
    MintAuthority,
    FreezeAuthority,
    RiskLevel,
    RiskFlags,
    WhaleActivity,
}

/// Provider fields after normalization into the fixed schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedFields {
    pub metrics: BTreeMap<Metric, f64>,
    pub labels: BTreeMap<Label, String>,
}

impl NormalizedFields {
    fn metric(&mut self, key: Metric, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.metrics.insert(key, v);
        }
    }

    fn count(&mut self, key: Metric, value: Option<u64>) {
        self.metric(key, value.map(|v| v as f64));
    }

    fn label(&mut self, key: Label, value: Option<&str>) {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.labels.insert(key, v.to_string());
        }
    }

    fn age(&mut self, created_at: Option<DateTime<Utc>>, fetched_at: DateTime<Utc>) {
        if let Some(created) = created_at {
            let secs = (fetched_at - created).num_seconds().max(0);
            self.metrics.insert(Metric::AgeHours, secs as f64 / 3600.0);
        }
    }

    fn trades(&mut self, buys: Option<u64>, sells: Option<u64>) {
        self.count(Metric::Buys24h, buys);
        self.count(Metric::Sells24h, sells);
        if let (Some(b), Some(s)) = (buys, sells) {
            self.metrics.insert(Metric::Trades24h, b.saturating_add(s) as f64);
        }
    }
}

// ============================================================================
// Per-provider payloads
// ============================================================================

/// DEX pair snapshot (DexScreener)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DexScreenerFields {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub volume_24h: Option<f64>,
    pub volume_6h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub buys_24h: Option<u64>,
    pub sells_24h: Option<u64>,
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    pub pair_created_at: Option<DateTime<Utc>>,
}

/// Pool snapshot (GeckoTerminal)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeckoTerminalFields {
    pub symbol: Option<String>,
    pub price_usd: Option<f64>,
    pub reserve_usd: Option<f64>,
    pub volume_24h: Option<f64>,
    pub fdv_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub buys_24h: Option<u64>,
    pub sells_24h: Option<u64>,
    pub buyers_24h: Option<u64>,
    pub pool_created_at: Option<DateTime<Utc>>,
}

/// Token overview / holder snapshot (Birdeye)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BirdeyeFields {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub liquidity: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub volume_24h_change_pct: Option<f64>,
    pub market_cap: Option<f64>,
    pub holder_count: Option<u64>,
    pub buy_24h: Option<u64>,
    pub sell_24h: Option<u64>,
    pub unique_wallet_24h: Option<u64>,
    pub price_change_24h_pct: Option<f64>,
    pub buy_volume_24h_usd: Option<f64>,
    pub sell_volume_24h_usd: Option<f64>,
    pub top10_holder_pct: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Severity of one security finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Info,
    Warn,
    Danger,
}

/// One finding from a security audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub name: String,
    pub level: RiskSeverity,
}

/// Security audit report (RugCheck)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RugCheckFields {
    /// Normalized 0-100 risk score, higher is riskier
    pub risk_score: Option<f64>,
    pub risks: Vec<RiskItem>,
    /// `None` = revoked
    pub mint_authority: Option<String>,
    /// `None` = revoked
    pub freeze_authority: Option<String>,
    pub top10_holder_pct: Option<f64>,
    pub lp_locked_pct: Option<f64>,
    pub holder_count: Option<u64>,
}

/// Provider-specific fields, one variant per provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderPayload {
    DexScreener(DexScreenerFields),
    GeckoTerminal(GeckoTerminalFields),
    Birdeye(BirdeyeFields),
    RugCheck(RugCheckFields),
}

impl ProviderPayload {
    /// Provider that produces this payload shape
    pub fn provider(&self) -> Provider {
        match self {
            ProviderPayload::DexScreener(_) => Provider::DexScreener,
            ProviderPayload::GeckoTerminal(_) => Provider::GeckoTerminal,
            ProviderPayload::Birdeye(_) => Provider::Birdeye,
            ProviderPayload::RugCheck(_) => Provider::RugCheck,
        }
    }

    /// Map the payload into the fixed normalized schema
    pub fn normalize(&self, fetched_at: DateTime<Utc>) -> NormalizedFields {
        let mut out = NormalizedFields::default();
        match self {
            ProviderPayload::DexScreener(d) => {
                out.label(Label::Symbol, d.symbol.as_deref());
                out.label(Label::Name, d.name.as_deref());
                out.metric(Metric::PriceUsd, d.price_usd);
                out.metric(Metric::LiquidityUsd, d.liquidity_usd);
                out.metric(Metric::Volume24hUsd, d.volume_24h);
                out.metric(Metric::PriceChange24hPct, d.price_change_24h);
                out.metric(Metric::MarketCapUsd, d.market_cap.or(d.fdv));
                // 6h volume extrapolated against the 24h total gives a trend
                if let (Some(v6), Some(v24)) = (d.volume_6h, d.volume_24h) {
                    if v24 > 0.0 {
                        out.metric(Metric::VolumeChange24hPct, Some((v6 * 4.0 / v24 - 1.0) * 100.0));
                    }
                }
                out.trades(d.buys_24h, d.sells_24h);
                out.age(d.pair_created_at, fetched_at);
            }
            ProviderPayload::GeckoTerminal(g) => {
                out.label(Label::Symbol, g.symbol.as_deref());
                out.metric(Metric::PriceUsd, g.price_usd);
                out.metric(Metric::LiquidityUsd, g.reserve_usd);
                out.metric(Metric::Volume24hUsd, g.volume_24h);
                out.metric(Metric::PriceChange24hPct, g.price_change_24h);
                out.metric(Metric::MarketCapUsd, g.market_cap_usd.or(g.fdv_usd));
                out.count(Metric::UniqueWallets24h, g.buyers_24h);
                out.trades(g.buys_24h, g.sells_24h);
                out.age(g.pool_created_at, fetched_at);
            }
            ProviderPayload::Birdeye(b) => {
                out.label(Label::Symbol, b.symbol.as_deref());
                out.label(Label::Name, b.name.as_deref());
                out.metric(Metric::PriceUsd, b.price);
                out.metric(Metric::LiquidityUsd, b.liquidity);
                out.metric(Metric::Volume24hUsd, b.volume_24h_usd);
                out.metric(Metric::VolumeChange24hPct, b.volume_24h_change_pct);
                out.metric(Metric::MarketCapUsd, b.market_cap);
                out.metric(Metric::PriceChange24hPct, b.price_change_24h_pct);
                out.metric(Metric::BuyVolume24hUsd, b.buy_volume_24h_usd);
                out.metric(Metric::SellVolume24hUsd, b.sell_volume_24h_usd);
                out.metric(Metric::Top10HolderPct, b.top10_holder_pct);
                out.count(Metric::HolderCount, b.holder_count);
                out.count(Metric::UniqueWallets24h, b.unique_wallet_24h);
                out.trades(b.buy_24h, b.sell_24h);
                out.age(b.created_at, fetched_at);
            }
            ProviderPayload::RugCheck(r) => {
                out.metric(Metric::RiskScore, r.risk_score.map(|s| s.clamp(0.0, 100.0)));
                out.metric(Metric::Top10HolderPct, r.top10_holder_pct);
                out.metric(Metric::LpLockedPct, r.lp_locked_pct);
                out.count(Metric::HolderCount, r.holder_count);
                out.label(Label::MintAuthority, Some(authority_label(&r.mint_authority)));
                out.label(Label::FreezeAuthority, Some(authority_label(&r.freeze_authority)));
                out.label(Label::RiskLevel, Some(risk_level(&r.risks)));

                let mut names: Vec<&str> = r.risks.iter().map(|i| i.name.as_str()).collect();
                names.sort_unstable();
                names.dedup();
                out.label(Label::RiskFlags, Some(names.join(",").as_str()));
            }
        }
        out
    }
}

fn authority_label(authority: &Option<String>) -> &'static str {
    match authority {
        Some(_) => "active",
        None => "revoked",
    }
}

fn risk_level(risks: &[RiskItem]) -> &'static str {
    match risks.iter().map(|r| r.level).max() {
        Some(RiskSeverity::Danger) => "danger",
        Some(RiskSeverity::Warn) => "warn",
        _ => "good",
    }
}

/// One provider's observation of one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub address: Address,
    pub provider: Provider,
    pub payload: ProviderPayload,
    pub fetched_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(address: Address, payload: ProviderPayload, fetched_at: DateTime<Utc>) -> Self {
        Self {
            address,
            provider: payload.provider(),
            payload,
            fetched_at,
        }
    }

    /// Normalized view of this record's provider fields
    pub fn fields(&self) -> NormalizedFields {
        self.payload.normalize(self.fetched_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_address_normalization() {
        let a = Address::normalize("  AbC123 ").unwrap();
        assert_eq!(a.as_str(), "AbC123");
        assert_eq!(a.key(), "abc123");
        assert_eq!(a.to_string(), "AbC123");
        assert_eq!(a, Address::normalize("abc123").unwrap());
        assert!(Address::normalize("   ").is_none());
    }

    #[test]
    fn test_address_identity_ignores_case() {
        use std::collections::HashSet;

        let mint = Address::normalize("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap();
        let folded = Address::normalize("epjfwdd5aufqssqem2qn1xzybapc8g4weggkzwytdt1v").unwrap();

        let set: HashSet<Address> = [mint.clone(), folded.clone()].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(mint.cmp(&folded), std::cmp::Ordering::Equal);
        assert_ne!(mint.as_str(), folded.as_str());

        // Serialized form keeps the original spelling
        let json = serde_json::to_string(&mint).unwrap();
        assert_eq!(json, "\"EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), mint.as_str());
        assert!(serde_json::from_str::<Address>("\"  \"").is_err());
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Birdeye".parse::<Provider>().unwrap(), Provider::Birdeye);
        assert_eq!(" rugcheck".parse::<Provider>().unwrap(), Provider::RugCheck);
        assert!("jupiter".parse::<Provider>().is_err());
        assert_eq!(Provider::GeckoTerminal.api_key_env(), "GECKOTERMINAL_API_KEY");
    }

    #[test]
    fn test_dexscreener_normalization() {
        let now = Utc::now();
        let payload = ProviderPayload::DexScreener(DexScreenerFields {
            symbol: Some("BONK".into()),
            liquidity_usd: Some(100_000.0),
            volume_24h: Some(8_000.0),
            volume_6h: Some(3_000.0),
            buys_24h: Some(40),
            sells_24h: Some(10),
            fdv: Some(2_000_000.0),
            pair_created_at: Some(now - Duration::hours(36)),
            ..Default::default()
        });

        let fields = payload.normalize(now);
        assert_eq!(fields.metrics[&Metric::LiquidityUsd], 100_000.0);
        assert_eq!(fields.metrics[&Metric::MarketCapUsd], 2_000_000.0);
        assert_eq!(fields.metrics[&Metric::Trades24h], 50.0);
        assert_eq!(fields.metrics[&Metric::AgeHours], 36.0);
        assert_eq!(fields.metrics[&Metric::VolumeChange24hPct], 50.0);
        assert_eq!(fields.labels[&Label::Symbol], "BONK");
    }

    #[test]
    fn test_rugcheck_labels() {
        let payload = ProviderPayload::RugCheck(RugCheckFields {
            risk_score: Some(140.0),
            risks: vec![
                RiskItem { name: "mutable_metadata".into(), level: RiskSeverity::Warn },
                RiskItem { name: "freeze_authority".into(), level: RiskSeverity::Danger },
            ],
            freeze_authority: Some("Auth111".into()),
            ..Default::default()
        });

        let fields = payload.normalize(Utc::now());
        assert_eq!(fields.metrics[&Metric::RiskScore], 100.0);
        assert_eq!(fields.labels[&Label::RiskLevel], "danger");
        assert_eq!(fields.labels[&Label::MintAuthority], "revoked");
        assert_eq!(fields.labels[&Label::FreezeAuthority], "active");
        assert_eq!(fields.labels[&Label::RiskFlags], "freeze_authority,mutable_metadata");
    }

    #[test]
    fn test_non_finite_values_dropped() {
        let payload = ProviderPayload::Birdeye(BirdeyeFields {
            price: Some(f64::NAN),
            liquidity: Some(5.0),
            ..Default::default()
        });
        let fields = payload.normalize(Utc::now());
        assert!(!fields.metrics.contains_key(&Metric::PriceUsd));
        assert_eq!(fields.metrics[&Metric::LiquidityUsd], 5.0);
    }

    #[test]
    fn test_trade_total_saturates() {
        let payload = ProviderPayload::Birdeye(BirdeyeFields {
            buy_24h: Some(u64::MAX),
            sell_24h: Some(u64::MAX),
            ..Default::default()
        });
        let fields = payload.normalize(Utc::now());
        assert_eq!(fields.metrics[&Metric::Trades24h], u64::MAX as f64);
    }

    #[test]
    fn test_record_provider_follows_payload() {
        let record = TokenRecord::new(
            Address::normalize("Mint1").unwrap(),
            ProviderPayload::GeckoTerminal(GeckoTerminalFields::default()),
            Utc::now(),
        );
        assert_eq!(record.provider, Provider::GeckoTerminal);
    }
}
