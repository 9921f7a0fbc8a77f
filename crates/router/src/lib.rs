#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod relay;
pub mod router;
pub mod sniff;

// 라우터
pub use router::{ConnectionRouter, ConnectionRouterBuilder, HOST_ROUTE, Route, RouteKind};

// 설정
pub use config::{ConnectionRouterConfig, ConnectionRouterConfigBuilder};

// 에러
pub use error::RouterError;

// 스니핑 / 릴레이
pub use relay::{RelayEnd, RelayStats, dial_backend, relay};
pub use sniff::{Protocol, Scan, SniffError, SniffLimits, Sniffed, sniff_routing_key};
