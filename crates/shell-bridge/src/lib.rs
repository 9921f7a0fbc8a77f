#![doc = include_str!("../README.md")]

pub mod bridge;
pub mod config;
pub mod error;
pub mod server;
pub mod session;

// 셸 브릿지
pub use server::{ChannelSink, ShellBridge, ShellBridgeBuilder, load_host_key};

// 설정
pub use config::ShellBridgeConfig;

// 에러
pub use error::ShellBridgeError;

// 세션 / 브릿지
pub use bridge::{
    BridgeChannels, BridgeHandles, BridgeOutcome, SessionSink, bridge_channels, close_session,
    run_bridge,
};
pub use session::{
    EXIT_EXEC_FAILED, EXIT_NOT_INTERACTIVE, EXIT_OK, PtySize, SessionPlan, ShellRequest,
    plan_session, welcome_line,
};
