use bigdecimal::BigDecimal;
use ethers::abi::{HumanReadableParser, Token};
use ethers::types::{I256, U256};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::bytecode::resolve_oracle_from_creation_code;
use super::decimals::{normalize, truncate};
use super::expr::{Expression, Fields};
use crate::config::{CollateralConfig, Config, DeploymentConfig};
use crate::db::models::immutables::ColImmutablesRow;
use crate::db::models::prices_and_rates::NewPricesAndRates;
use crate::db::models::time_sample_points::{Granularity, NewTimeSamplePoint};
use crate::db::models::trove_managers::TroveManager;
use crate::db::{ConflictPolicy, Store};
use crate::error::{GatewayError, IndexerError, IndexerResult};
use crate::gateway::contracts::{DecimalsCall, LastGoodPriceCall, LatestAnswerCall};
use crate::gateway::{format_address, parse_address, read, BlockRef, BlockTag, ChainGateway};
use crate::logging::{LogContext, LogSink};
use crate::retry::RetryPolicy;

pub const FIELD_PRICE_FEED: &str = "colUSDPriceFeed";
pub const FIELD_ORACLE: &str = "colUSDOracle";
pub const FIELD_CANONICAL_RATE: &str = "canonicalRate";
pub const FIELD_UNDERLYING_ORACLE: &str = "underlyingUSDOracle";

/// Writes one `prices_and_rates` row per trove manager per run and indexes
/// it as an hour/day sample point.
pub struct PriceResolver {
    config: Arc<Config>,
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn Store>,
    log: LogSink,
    /// Oracle addresses recovered from creation code, keyed by (chain, feed, argument).
    discovered: Mutex<HashMap<(String, String, usize), String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OracleRole {
    Collateral,
    Underlying,
}

impl OracleRole {
    fn field(self) -> &'static str {
        match self {
            OracleRole::Collateral => FIELD_ORACLE,
            OracleRole::Underlying => FIELD_UNDERLYING_ORACLE,
        }
    }
}

impl PriceResolver {
    pub fn new(config: Arc<Config>, gateway: Arc<dyn ChainGateway>, store: Arc<dyn Store>, log: LogSink) -> Self {
        Self {
            config,
            gateway,
            store,
            log,
            discovered: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves every trove manager of `protocol_id` on `chain` at the latest block.
    /// Returns the number of rows written.
    pub async fn run(&self, protocol_id: i32, chain: &str) -> IndexerResult<usize> {
        let ctx = LogContext::new(chain, protocol_id);
        let deployment = self.config.protocol(protocol_id)?.deployment(chain)?;
        let retry = self.retry_policy(chain)?;

        let block = retry
            .run("latest_block", || async { Ok(self.gateway.latest_block(chain).await?) })
            .await?;
        self.store.record_block(chain, block).await?;

        let branches = self.store.latest_col_immutables(protocol_id, chain).await?;
        if branches.is_empty() {
            self.log.missing_values(&ctx, "prices", "no immutables stored; run a snapshot first");
            return Ok(0);
        }

        let written: Vec<bool> = stream::iter(branches)
            .map(|(tm, imm)| {
                let ctx = ctx.clone();
                let retry = retry.clone();
                async move { self.resolve_branch(&ctx, &retry, deployment, &tm, &imm, block).await }
            })
            .buffer_unordered(self.config.persist_concurrency.max(1))
            .collect()
            .await;

        let count = written.into_iter().filter(|w| *w).count();
        info!("Resolved prices for {} trove managers on {} at block {}", count, chain, block.number);
        Ok(count)
    }

    fn retry_policy(&self, chain: &str) -> IndexerResult<RetryPolicy> {
        let chain_cfg = self.config.chain(chain)?;
        Ok(RetryPolicy::from_settings(&self.config.retry, chain_cfg.timeout_secs))
    }

    async fn resolve_branch(
        &self,
        ctx: &LogContext,
        retry: &RetryPolicy,
        deployment: &DeploymentConfig,
        tm: &TroveManager,
        imm: &ColImmutablesRow,
        block: BlockRef,
    ) -> bool {
        let Some(collateral) = deployment.collateral(tm.trove_manager_index) else {
            self.log.critical(
                ctx,
                "prices",
                format!("no collateral configuration for trove manager {}", tm.trove_manager_index),
            );
            return false;
        };

        let row = self.resolve_entry(ctx, retry, collateral, tm, imm, block).await;
        if let Err(e) = self.store.insert_prices(row, ConflictPolicy::Update).await {
            self.log.critical(ctx, "prices", format!("trove manager {}: {}", tm.trove_manager_index, e));
            return false;
        }
        for granularity in Granularity::ALL {
            let point = NewTimeSamplePoint::for_block(tm.id, granularity, block.number, block.timestamp);
            if let Err(e) = self.store.record_sample_point(point).await {
                self.log.missing_values(ctx, "prices", format!("sample point ({}): {}", granularity, e));
            }
        }
        true
    }

    /// Builds the entry for one branch. Unavailable inputs are logged and left empty.
    pub async fn resolve_entry(
        &self,
        ctx: &LogContext,
        retry: &RetryPolicy,
        collateral: &CollateralConfig,
        tm: &TroveManager,
        imm: &ColImmutablesRow,
        block: BlockRef,
    ) -> NewPricesAndRates {
        let chain = ctx.chain.as_str();
        let tag = BlockTag::Number(block.number);
        let function = format!("prices:{}", tm.trove_manager_index);

        let price_feed = self
            .read_feed_price(retry, chain, &imm.price_feed, tag, collateral.feed_decimals)
            .await;
        let price_feed = self.note(ctx, &function, FIELD_PRICE_FEED, price_feed);

        let mut oracle = match self.oracle_address(ctx, retry, collateral, imm, OracleRole::Collateral).await {
            Some(address) => {
                let read = self.read_oracle(retry, chain, &address, tag).await;
                self.note(ctx, &function, FIELD_ORACLE, read)
            }
            None => None,
        };

        let (mut canonical_rate, mut underlying) = (None, None);
        if collateral.is_lst {
            canonical_rate = match (&collateral.rate_provider, &collateral.rate_signature) {
                (Some(provider), Some(signature)) => {
                    let read = self
                        .read_canonical_rate(retry, chain, provider, signature, tag, collateral.rate_decimals)
                        .await;
                    self.note(ctx, &function, FIELD_CANONICAL_RATE, read)
                }
                _ => {
                    self.log
                        .missing_values(ctx, &function, format!("{}: no rate provider configured", FIELD_CANONICAL_RATE));
                    None
                }
            };
            underlying = match self.oracle_address(ctx, retry, collateral, imm, OracleRole::Underlying).await {
                Some(address) => {
                    let read = self.read_oracle(retry, chain, &address, tag).await;
                    self.note(ctx, &function, FIELD_UNDERLYING_ORACLE, read)
                }
                None => None,
            };
            if oracle.is_none() {
                if let (Some(rate), Some(usd)) = (&canonical_rate, &underlying) {
                    debug!("{}: implied oracle price from canonical rate", function);
                    oracle = Some(truncate(&(rate * usd)));
                }
            }
        }

        let deviation = match &collateral.deviation_formula {
            Some(formula) => {
                let mut fields = Fields::new();
                fields.insert(FIELD_PRICE_FEED.to_string(), price_feed.clone());
                fields.insert(FIELD_ORACLE.to_string(), oracle.clone());
                fields.insert(FIELD_CANONICAL_RATE.to_string(), canonical_rate.clone());
                fields.insert(FIELD_UNDERLYING_ORACLE.to_string(), underlying.clone());
                match Expression::parse(formula).and_then(|e| e.evaluate(&fields)) {
                    Ok(Some(value)) => Some(truncate(&value)),
                    Ok(None) => {
                        self.log
                            .missing_values(ctx, &function, format!("deviation unavailable for {}", formula));
                        None
                    }
                    Err(e) => {
                        self.log.critical(ctx, &function, format!("deviation formula {:?}: {}", formula, e));
                        None
                    }
                }
            }
            None => None,
        };

        NewPricesAndRates {
            trove_manager_id: tm.id,
            block_number: block.number,
            col_usd_price_feed: price_feed,
            col_usd_oracle: oracle,
            canonical_rate,
            underlying_usd_oracle: underlying,
            deviation,
        }
    }

    fn note(
        &self,
        ctx: &LogContext,
        function: &str,
        field: &str,
        value: IndexerResult<BigDecimal>,
    ) -> Option<BigDecimal> {
        match value {
            Ok(v) => Some(v),
            Err(e) => {
                self.log.missing_values(ctx, function, format!("{}: {}", field, e));
                None
            }
        }
    }

    async fn read_feed_price(
        &self,
        retry: &RetryPolicy,
        chain: &str,
        feed: &str,
        block: BlockTag,
        decimals: u32,
    ) -> IndexerResult<BigDecimal> {
        let feed = parse_address(feed)?;
        let raw: U256 = retry
            .run("lastGoodPrice", || async {
                Ok(read(self.gateway.as_ref(), chain, feed, LastGoodPriceCall, block).await?)
            })
            .await?;
        scale(&raw.to_string(), decimals)
    }

    /// Chainlink-style `latestAnswer` scaled by the aggregator's own `decimals`.
    async fn read_oracle(
        &self,
        retry: &RetryPolicy,
        chain: &str,
        address: &str,
        block: BlockTag,
    ) -> IndexerResult<BigDecimal> {
        let oracle = parse_address(address)?;
        let decimals: u8 = retry
            .run("decimals", || async {
                Ok(read(self.gateway.as_ref(), chain, oracle, DecimalsCall, block).await?)
            })
            .await?;
        let answer: I256 = retry
            .run("latestAnswer", || async {
                Ok(read(self.gateway.as_ref(), chain, oracle, LatestAnswerCall, block).await?)
            })
            .await?;
        scale(&answer.to_string(), u32::from(decimals))
    }

    /// Exchange rate from the LST's own getter, declared in config as a
    /// human-readable function such as `function stEthPerToken() view returns (uint256)`.
    async fn read_canonical_rate(
        &self,
        retry: &RetryPolicy,
        chain: &str,
        provider: &str,
        signature: &str,
        block: BlockTag,
        decimals: u32,
    ) -> IndexerResult<BigDecimal> {
        let function = HumanReadableParser::parse_function(signature)
            .map_err(|e| IndexerError::Config(format!("rate signature {:?}: {}", signature, e)))?;
        let calldata = function
            .encode_input(&[])
            .map_err(|e| IndexerError::Config(format!("rate signature {:?}: {}", signature, e)))?;
        let provider = parse_address(provider)?;
        let output = retry
            .run(&function.name, || async {
                Ok(self.gateway.call(chain, provider, calldata.clone().into(), block).await?)
            })
            .await?;

        let tokens = function
            .decode_output(output.as_ref())
            .map_err(|e| GatewayError::Decode(format!("{} on {}: {}", function.name, format_address(provider), e)))?;
        let raw = match tokens.first() {
            Some(Token::Uint(value)) => value.to_string(),
            Some(Token::Int(value)) => I256::from_raw(*value).to_string(),
            other => {
                return Err(GatewayError::Decode(format!("{} returned {:?}, not an integer", function.name, other)).into())
            }
        };
        scale(&raw, decimals)
    }

    /// Configured address, else the one recovered from the price feed's creation code.
    async fn oracle_address(
        &self,
        ctx: &LogContext,
        retry: &RetryPolicy,
        collateral: &CollateralConfig,
        imm: &ColImmutablesRow,
        role: OracleRole,
    ) -> Option<String> {
        let (configured, arg_index) = match role {
            OracleRole::Collateral => (&collateral.oracle, collateral.oracle_arg_index),
            OracleRole::Underlying => (&collateral.underlying_oracle, collateral.underlying_oracle_arg_index),
        };
        if let Some(address) = configured {
            return Some(address.to_lowercase());
        }
        let function = format!("oracle:{}", collateral.index);
        let Some(arg_index) = arg_index else {
            self.log
                .missing_values(ctx, &function, format!("{}: no oracle address or argument position", role.field()));
            return None;
        };

        let key = (ctx.chain.clone(), imm.price_feed.clone(), arg_index);
        if let Some(address) = self.discovered.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Some(address);
        }

        let chain = ctx.chain.as_str();
        let code = retry
            .run("creation_code", || async {
                let feed = parse_address(&imm.price_feed)?;
                Ok(self.gateway.creation_code(chain, feed).await?)
            })
            .await;
        let resolved = code.map_err(|e| e.to_string()).and_then(|code| {
            resolve_oracle_from_creation_code(&hex::encode(&code), arg_index, collateral.constructor_arg_count)
                .map_err(|e| e.to_string())
        });
        match resolved {
            Ok(address) => {
                info!("Discovered {} {} from creation code of {}", role.field(), address, imm.price_feed);
                if let Ok(mut cache) = self.discovered.lock() {
                    cache.insert(key, address.clone());
                }
                Some(address)
            }
            Err(e) => {
                self.log.missing_values(ctx, &function, format!("{}: {}", role.field(), e));
                None
            }
        }
    }
}

fn scale(raw: &str, decimals: u32) -> IndexerResult<BigDecimal> {
    normalize(raw, decimals).map_err(|e| IndexerError::Gateway(GatewayError::Decode(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::immutables::NewColImmutables;
    use crate::gateway::fake::FakeGateway;
    use crate::logging::Keyword;
    use ethers::abi::AbiEncode;
    use std::str::FromStr;

    const FEED: &str = "0x00000000000000000000000000000000000000f1";
    const ORACLE: &str = "0x00000000000000000000000000000000000000a1";
    const UNDERLYING: &str = "0x00000000000000000000000000000000000000a2";
    const RATE: &str = "0x00000000000000000000000000000000000000b1";

    fn config(collateral: &str) -> Arc<Config> {
        let toml = format!(
            r#"
            database_url = "postgres://localhost/troves"
            listen_addr = "127.0.0.1:0"
            [retry]
            max_attempts = 1
            base_delay_ms = 0
            exponential = false
            jitter_ms = 0
            [chains.ethereum]
            rpc_url = "http://localhost:8545"
            [[protocols]]
            protocol_id = 1
            name = "liquity-v2"
            kind = "liquity_v2"
            [[protocols.deployments]]
            chain = "ethereum"
            collateral_registry = "0x00000000000000000000000000000000000000c0"
            [[protocols.deployments.collaterals]]
            {}
            "#,
            collateral
        );
        let settings = config::Config::builder()
            .add_source(config::File::from_str(&toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        Arc::new(settings.try_deserialize().unwrap())
    }

    fn branch(store: &MemoryStore) {
        store.seed_col_immutables(NewColImmutables {
            trove_manager_id: 1,
            block_number: 10,
            collateral_token: "0x01".into(),
            collateral_decimals: 18,
            addresses_registry: "0x02".into(),
            price_feed: FEED.into(),
            active_pool: "0x03".into(),
            default_pool: "0x04".into(),
            stability_pool: "0x05".into(),
            borrower_operations: "0x06".into(),
            sorted_troves: "0x07".into(),
            ccr: BigDecimal::from(1),
            mcr: BigDecimal::from(1),
            scr: BigDecimal::from(1),
        });
    }

    async fn setup(collateral: &str) -> (Arc<FakeGateway>, Arc<MemoryStore>, PriceResolver, LogSink) {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_latest(BlockRef { number: 100, timestamp: 1_704_202_800 });
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_trove_managers(
                1,
                "ethereum",
                &[crate::protocol::TroveManagerInfo {
                    index: 0,
                    address: "0x00000000000000000000000000000000000000d0".into(),
                    collateral_token: "0x01".into(),
                }],
            )
            .await
            .unwrap();
        branch(&store);
        let log = LogSink::init();
        let resolver = PriceResolver::new(config(collateral), gateway.clone(), store.clone(), log.clone());
        (gateway, store, resolver, log)
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn resolves_configured_oracle_and_deviation() {
        let collateral = format!(
            r#"index = 0
            oracle = "{}"
            deviation_formula = "(colUSDOracle - colUSDPriceFeed) / colUSDPriceFeed""#,
            ORACLE
        );
        let (gateway, store, resolver, log) = setup(&collateral).await;
        gateway.on_call(FEED, LastGoodPriceCall, U256::exp10(20));
        gateway.on_call(ORACLE, DecimalsCall, 8u8);
        gateway.on_call(ORACLE, LatestAnswerCall, I256::from(11_000_000_000i64));

        assert_eq!(resolver.run(1, "ethereum").await.unwrap(), 1);
        let rows = store.prices();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].col_usd_price_feed, Some(dec("100")));
        assert_eq!(rows[0].col_usd_oracle, Some(dec("110")));
        assert_eq!(rows[0].deviation, Some(dec("0.1")));
        assert_eq!(log.count(Keyword::MissingValues), 0);

        let hourly = store.sample_points(1, "hour").await.unwrap();
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].block_number, 100);
        assert_eq!(store.sample_points(1, "day").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn discovers_oracle_from_creation_code_once() {
        let collateral = r#"index = 0
            oracle_arg_index = 1
            constructor_arg_count = 3"#;
        let (gateway, store, resolver, _log) = setup(collateral).await;
        let code = format!("6080604052{:0>64}{:0>64}{:0>64}", "1", &ORACLE[2..], "2");
        gateway.set_creation_code(FEED, hex::decode(&code).unwrap());
        gateway.on_call(FEED, LastGoodPriceCall, U256::exp10(18) * 2_000);
        gateway.on_call(ORACLE, DecimalsCall, 8u8);
        gateway.on_call(ORACLE, LatestAnswerCall, I256::from(200_100_000_000i64));

        resolver.run(1, "ethereum").await.unwrap();
        assert_eq!(store.prices()[0].col_usd_oracle, Some(dec("2001")));

        // Cached: a missing creation record no longer matters.
        gateway.set_creation_code(FEED, Vec::new());
        gateway.set_latest(BlockRef { number: 101, timestamp: 1_704_202_812 });
        resolver.run(1, "ethereum").await.unwrap();
        assert_eq!(store.prices().len(), 2);
        assert!(store.prices().iter().all(|p| p.col_usd_oracle == Some(dec("2001"))));
    }

    #[tokio::test]
    async fn lst_implied_price_and_partial_entry() {
        let collateral = format!(
            r#"index = 0
            is_lst = true
            underlying_oracle = "{}"
            rate_provider = "{}"
            rate_signature = "function stEthPerToken() view returns (uint256)"
            deviation_formula = "(colUSDOracle - colUSDPriceFeed) / colUSDPriceFeed""#,
            UNDERLYING, RATE
        );
        let (gateway, store, resolver, log) = setup(&collateral).await;
        // The feed itself reverts; the entry is still written.
        let rate_call = HumanReadableParser::parse_function("function stEthPerToken() view returns (uint256)")
            .unwrap()
            .encode_input(&[])
            .unwrap();
        gateway.on_raw(RATE, rate_call, (U256::exp10(17) * 12u64).encode());
        gateway.on_call(UNDERLYING, DecimalsCall, 8u8);
        gateway.on_call(UNDERLYING, LatestAnswerCall, I256::from(300_000_000_000i64));

        assert_eq!(resolver.run(1, "ethereum").await.unwrap(), 1);
        let row = &store.prices()[0];
        assert_eq!(row.canonical_rate, Some(dec("1.2")));
        assert_eq!(row.underlying_usd_oracle, Some(dec("3000")));
        assert_eq!(row.col_usd_oracle, Some(dec("3600")));
        assert_eq!(row.col_usd_price_feed, None);
        assert_eq!(row.deviation, None);

        let missing: Vec<String> = log
            .events()
            .into_iter()
            .filter(|e| e.keyword == Keyword::MissingValues)
            .map(|e| e.error)
            .collect();
        assert!(missing.iter().any(|m| m.starts_with(FIELD_PRICE_FEED)));
        assert!(missing.iter().any(|m| m.starts_with("deviation unavailable")));
    }

    #[tokio::test]
    async fn missing_collateral_config_skips_branch() {
        let (_gateway, store, resolver, log) = setup("index = 5").await;
        assert_eq!(resolver.run(1, "ethereum").await.unwrap(), 0);
        assert!(store.prices().is_empty());
        assert_eq!(log.count(Keyword::Critical), 1);
        assert!(resolver.run(1, "base").await.is_err());
    }
}
