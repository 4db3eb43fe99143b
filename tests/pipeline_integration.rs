//! Discovery Pipeline Integration Tests
//!
//! Drive whole cycles from a TOML configuration through the wiring layer:
//! 1. Three-provider discovery -> correlation -> quick stage
//! 2. Budget exhaustion -> threshold alerts and degraded admission
//! 3. Partial batch answers -> individual re-queue
//!
//! All tests are deterministic (no real network calls) and use scripted clients.

use std::sync::Arc;

use approx::assert_relative_eq;

use chrono::Utc;
use token_scout::config::{build_cycle_with_clients, Config};
use token_scout::domain::{
    BirdeyeFields, FieldSet, Metric, Provider, ProviderPayload, RejectReason, Stage, TokenRecord,
};
use token_scout::ports::mocks::{addr, market_record, ClientCall, RecordingSink, ScriptedClient};
use token_scout::ports::{CycleOutcome, ProviderClient};

// ============================================================================
// Test Fixtures
// ============================================================================

const PROVIDERS: &str = r#"
[providers.dexscreener]
calls_per_period = 6000
base_cost = 1
max_batch_size = 30
retry_base_delay_ms = 1

[providers.geckoterminal]
calls_per_period = 6000
base_cost = 2
retry_base_delay_ms = 1

[providers.birdeye]
calls_per_period = 6000
base_cost = 10
max_batch_size = 50
retry_base_delay_ms = 1

[providers.rugcheck]
calls_per_period = 6000
base_cost = 5
retry_base_delay_ms = 1
"#;

fn config(cycle: &str, extra: &str) -> Config {
    let text = format!("{}\n{}\n{}", cycle, extra, PROVIDERS);
    Config::from_toml_str(&text).expect("test config should be valid")
}

fn as_clients(clients: &[Arc<ScriptedClient>]) -> Vec<Arc<dyn ProviderClient>> {
    clients
        .iter()
        .map(|c| c.clone() as Arc<dyn ProviderClient>)
        .collect()
}

/// Birdeye record with enough activity data to clear the medium stage
fn active_birdeye(address: &str, liquidity: f64) -> TokenRecord {
    TokenRecord::new(
        addr(address),
        ProviderPayload::Birdeye(BirdeyeFields {
            symbol: Some(address.to_uppercase()),
            liquidity: Some(liquidity),
            volume_24h_usd: Some(liquidity * 2.0),
            volume_24h_change_pct: Some(50.0),
            price_change_24h_pct: Some(20.0),
            holder_count: Some(4_000),
            buy_24h: Some(3_000),
            sell_24h: Some(1_000),
            buy_volume_24h_usd: Some(300_000.0),
            sell_volume_24h_usd: Some(100_000.0),
            top10_holder_pct: Some(30.0),
            ..Default::default()
        }),
        Utc::now(),
    )
}

// ============================================================================
// Discovery and correlation
// ============================================================================

#[tokio::test]
async fn test_three_provider_token_reaches_quick_passed() {
    let now = Utc::now();
    let dex = Arc::new(
        ScriptedClient::new(Provider::DexScreener)
            .with_listing(vec![market_record(Provider::DexScreener, "tokA", 100_000.0, 5_000.0, now)]),
    );
    let gecko = Arc::new(
        ScriptedClient::new(Provider::GeckoTerminal)
            .with_listing(vec![market_record(Provider::GeckoTerminal, "tokA", 102_000.0, 5_500.0, now)]),
    );
    let birdeye = Arc::new(
        ScriptedClient::new(Provider::Birdeye)
            .with_listing(vec![market_record(Provider::Birdeye, "tokA", 98_000.0, 4_800.0, now)]),
    );
    let rugcheck = Arc::new(ScriptedClient::new(Provider::RugCheck));

    let config = config(
        "[cycle]\ndiscovery_providers = [\"dexscreener\", \"geckoterminal\", \"birdeye\"]",
        "",
    );
    let sink = Arc::new(RecordingSink::new());
    let cycle = build_cycle_with_clients(&config, as_clients(&[dex, gecko, birdeye.clone(), rugcheck]))
        .unwrap()
        .with_sinks(sink.clone(), sink.clone());

    let report = cycle.run_once().await;

    assert_eq!(report.summary.outcome, CycleOutcome::Completed);
    assert_eq!(report.summary.tokens_discovered, 1);
    assert_eq!(report.tokens.len(), 1);

    let token = &report.tokens[0];
    assert_eq!(token.address, addr("TOKA"));
    assert_eq!(token.platform_count(), 3);
    assert_relative_eq!(token.metric(Metric::LiquidityUsd).unwrap(), 100_000.0, max_relative = 0.021);
    assert_relative_eq!(token.metric(Metric::Volume24hUsd).unwrap(), 5_000.0, max_relative = 0.11);

    // Market-only activity data cannot carry the medium stage
    assert!(token.stage_scores.contains_key("quick"));
    assert_eq!(token.stage(), Stage::Rejected);
    assert_eq!(token.rejected_from(), Some(Stage::QuickPassed));

    let quick = report.stages.iter().find(|s| s.stage == "quick").unwrap();
    assert_eq!(quick.passed, 1);
    assert_eq!(birdeye.one_calls(), vec![addr("tokA")]);

    assert_eq!(sink.summaries().len(), 1);
    assert_eq!(sink.summaries()[0].tokens_rejected_by_stage.get("quick_passed"), Some(&1));
}

#[tokio::test]
async fn test_cycle_aborts_when_every_listing_fails() {
    use token_scout::ports::{AbortReason, ProviderErrorKind};

    let dex = Arc::new(ScriptedClient::new(Provider::DexScreener).with_list_failure(ProviderErrorKind::Client));
    let gecko = Arc::new(ScriptedClient::new(Provider::GeckoTerminal).with_list_failure(ProviderErrorKind::Client));
    let birdeye = Arc::new(ScriptedClient::new(Provider::Birdeye));

    let config = config("[cycle]\ndiscovery_providers = [\"dexscreener\", \"geckoterminal\"]", "");
    let sink = Arc::new(RecordingSink::new());
    let cycle = build_cycle_with_clients(&config, as_clients(&[dex, gecko, birdeye]))
        .unwrap()
        .with_sinks(sink.clone(), sink.clone());

    let report = cycle.run_once().await;

    assert_eq!(
        report.summary.outcome,
        CycleOutcome::Aborted {
            cause: AbortReason::AllProvidersUnreachable
        }
    );
    assert!(sink.published().is_empty());
    assert_eq!(sink.summaries().len(), 1);
}

// ============================================================================
// Budget
// ============================================================================

#[tokio::test]
async fn test_budget_exhaustion_alerts_once_and_degrades() {
    let now = Utc::now();
    let dex = Arc::new(
        ScriptedClient::new(Provider::DexScreener)
            .with_listing(vec![market_record(Provider::DexScreener, "tokA", 100_000.0, 300_000.0, now)]),
    );
    let gecko = Arc::new(
        ScriptedClient::new(Provider::GeckoTerminal)
            .with_listing(vec![market_record(Provider::GeckoTerminal, "tokA", 100_000.0, 300_000.0, now)]),
    );
    let birdeye = Arc::new(ScriptedClient::new(Provider::Birdeye).with_token(active_birdeye("tokA", 100_000.0)));

    // Two listings (1 + 2 units) exhaust a 3 unit budget
    let config = config(
        "[cycle]\ndiscovery_providers = [\"dexscreener\", \"geckoterminal\"]",
        "[budget]\ndaily_budget = 3\nreserve_pct = 0.0",
    );
    let cycle = build_cycle_with_clients(&config, as_clients(&[dex, gecko, birdeye.clone()])).unwrap();

    let first = cycle.run_once().await;
    assert_eq!(first.summary.budget_alerts, vec![80, 95, 100]);
    assert_eq!(first.summary.total_cost, 3);

    // Degraded: the normal-priority single lookup for the medium stage is refused
    assert!(birdeye.one_calls().is_empty());
    assert_eq!(
        first.summary.rejected_by_reason.get(&RejectReason::DataUnavailable),
        Some(&1)
    );

    // Levels fire once per day; cached listings cost nothing
    let second = cycle.run_once().await;
    assert!(second.summary.budget_alerts.is_empty());
    assert_eq!(second.summary.total_cost, 0);
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_partial_batch_answer_requeues_missing_tokens() {
    let now = Utc::now();
    let names: Vec<String> = (0..10).map(|i| format!("tok{}", i)).collect();

    let dex = Arc::new(
        ScriptedClient::new(Provider::DexScreener).with_listing(
            names
                .iter()
                .map(|n| market_record(Provider::DexScreener, n, 200_000.0, 400_000.0, now))
                .collect(),
        ),
    );
    let birdeye = names
        .iter()
        .fold(ScriptedClient::new(Provider::Birdeye).with_batch_subset(7), |client, n| {
            client.with_token(active_birdeye(n, 200_000.0))
        });
    let birdeye = Arc::new(birdeye);
    let rugcheck = Arc::new(ScriptedClient::new(Provider::RugCheck));

    let config = config("[cycle]\ndiscovery_providers = [\"dexscreener\"]", "");
    let cycle = build_cycle_with_clients(&config, as_clients(&[dex, birdeye.clone(), rugcheck])).unwrap();

    let report = cycle.run_once().await;
    assert_eq!(report.summary.tokens_discovered, 10);

    let batches = birdeye.batch_calls();
    assert!(!batches.is_empty());
    assert_eq!(batches[0].len(), 10);

    let activity_lookups = birdeye
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ClientCall::One(_, FieldSet::Activity)))
        .count();
    assert_eq!(activity_lookups, 3);

    let medium = report.stages.iter().find(|s| s.stage == "medium").unwrap();
    assert_eq!(medium.evaluated, 10);
    assert_eq!(medium.passed, 10);
}
