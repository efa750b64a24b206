//! Live market data layer.
//!
//! This crate keeps the latest quote per symbol and fans updates out to interested
//! consumers. It is organised bottom-up:
//! - `store` — `QuoteStore`, symbol -> latest `Quote`, with an ordering policy.
//! - `registry` — `SubscriptionRegistry` and `Subscription` handles for quote,
//!   option-chain and connection-status callbacks.
//! - `transport` — `StreamTransport` push channels and the `FeedSink` they write to.
//! - `fetch` — `QuoteFetcher` snapshots and concurrent `fetch_bulk`.
//! - `polling` — `Poller`, the fixed-interval bulk refresh.
//! - `hub` — `MarketDataHub`, the context object tying the above together.
//! - `views` — pure display and valuation helpers.
#![warn(missing_docs)]
pub mod fetch;
pub mod hub;
pub mod polling;
pub mod registry;
pub mod store;
pub mod transport;
pub mod views;

pub use fetch::{BulkFetch, FetchConfig, QuoteFetcher, TcpQuoteFetcher, fetch_bulk};
pub use hub::{HubConfig, MarketDataHub, QuoteTarget, ReconnectPolicy};
pub use polling::{PollOutcome, Poller, PollerConfig};
pub use registry::{Subscription, SubscriptionRegistry, Topic};
pub use store::{OrderingPolicy, QuoteStore};
pub use transport::{FeedSink, NullTransport, StreamConfig, StreamTransport, UdpStreamTransport};
