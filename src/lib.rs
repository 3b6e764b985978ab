//! Workspace root crate.
//!
//! Carries no runtime code of its own — it exists so the cross-instance
//! integration suite under `tests/integration/` can depend on `server`,
//! `notif-coordinator`, and `notif-test-util` as a single crate target.
