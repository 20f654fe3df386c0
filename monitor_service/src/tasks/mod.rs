// monitor_service/src/tasks/mod.rs
pub mod check_for_proofs;
pub mod check_no_sends;
pub mod clock;
pub mod fail_abandoned;
pub mod new_header;
pub mod purge;
pub mod review_status;
pub mod send_waiting;

pub use check_for_proofs::{get_proofs, CheckForProofs};
pub use check_no_sends::CheckNoSends;
pub use clock::Clock;
pub use fail_abandoned::FailAbandoned;
pub use new_header::NewHeader;
pub use purge::Purge;
pub use review_status::ReviewStatus;
pub use send_waiting::{send_waiting, BatchSendResult, BatchSendStatus, SendWaiting};
