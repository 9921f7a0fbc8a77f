//! 세션 계획 -- SSH 요청을 컨테이너 exec 여부와 종료 상태로 변환
//!
//! 네트워크나 Docker에 접근하지 않는 순수 함수만 포함합니다.

use std::sync::Arc;

use dockroute_core::types::{Container, Snapshot};

/// 셸이 정상 종료되었거나 사용자와 일치하는 컨테이너가 없음
pub const EXIT_OK: u32 = 0;
/// exec 생성/시작 실패
pub const EXIT_EXEC_FAILED: u32 = 1;
/// 대화형이 아닌 요청 (PTY 없음, exec 요청)
pub const EXIT_NOT_INTERACTIVE: u32 = 2;

/// 터미널 크기
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PtySize {
    /// 열 수
    pub cols: u16,
    /// 행 수
    pub rows: u16,
}

impl PtySize {
    /// SSH 요청의 u32 크기를 Docker가 받는 u16 범위로 제한합니다.
    pub fn from_request(cols: u32, rows: u32) -> Self {
        Self {
            cols: cols.min(u32::from(u16::MAX)) as u16,
            rows: rows.min(u32::from(u16::MAX)) as u16,
        }
    }

    /// 크기가 지정되지 않았는지 여부 (클라이언트가 0을 보낼 수 있음)
    pub fn is_unset(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

/// 채널에서 받은 실행 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellRequest {
    /// `shell` 요청. 앞서 받은 PTY 요청이 있으면 그 크기.
    Shell {
        /// PTY 크기
        pty: Option<PtySize>,
    },
    /// `exec` 요청 (명령 실행)
    Exec {
        /// 요청된 명령
        command: String,
    },
}

/// 세션 처리 방식
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPlan {
    /// 메시지를 쓰고 종료 상태와 함께 세션을 닫음. exec는 만들지 않습니다.
    Close {
        /// 세션에 쓸 메시지
        message: String,
        /// 종료 상태
        exit_status: u32,
    },
    /// 컨테이너에 셸을 연결
    Attach {
        /// 대상 컨테이너
        container: Arc<Container>,
        /// 초기 PTY 크기
        pty: PtySize,
    },
}

impl SessionPlan {
    /// exec가 필요한지 여부
    pub fn needs_exec(&self) -> bool {
        matches!(self, Self::Attach { .. })
    }
}

/// 사용자 이름과 요청으로 세션 처리 방식을 결정합니다.
///
/// 대화형 여부를 먼저 확인하므로, PTY 없는 요청은 사용자가 누구든 종료 상태 2로 닫힙니다.
pub fn plan_session(snapshot: &Snapshot, user: &str, request: &ShellRequest) -> SessionPlan {
    let pty = match request {
        ShellRequest::Shell { pty: Some(pty) } => *pty,
        ShellRequest::Shell { pty: None } => {
            return SessionPlan::Close {
                message: "dockroute: an interactive terminal is required (try ssh -t)\r\n"
                    .to_owned(),
                exit_status: EXIT_NOT_INTERACTIVE,
            };
        }
        ShellRequest::Exec { command } => {
            return SessionPlan::Close {
                message: format!(
                    "dockroute: command execution is not supported ({command:?}), request a shell\r\n"
                ),
                exit_status: EXIT_NOT_INTERACTIVE,
            };
        }
    };

    match snapshot.container_by_name(user) {
        Some(container) => SessionPlan::Attach {
            container: Arc::clone(container),
            pty,
        },
        None => SessionPlan::Close {
            message: format!("dockroute: no container named {user:?}\r\n"),
            exit_status: EXIT_OK,
        },
    }
}

/// 셸 연결 직후 보내는 환영 메시지
pub fn welcome_line(container: &Container) -> String {
    format!("Connected to container {}\r\n", container.display_name())
}
