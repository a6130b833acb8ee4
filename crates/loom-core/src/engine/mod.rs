//! Engine - 状態機械の実行エンジン
//!
//! - **TransitionEngine**: 1 step を実行し、永続化して RequestAction を返す
//! - **JoinCoordinator**: fork / when-all / when-any / 完了伝播
//! - **TransitionContext**: transition 関数から見える文脈

pub mod context;
pub mod coordinator;
pub mod transition;

pub use self::context::TransitionContext;
pub use self::coordinator::JoinCoordinator;
pub use self::transition::{CurrentRequest, StepOutcome, TransitionEngine};
