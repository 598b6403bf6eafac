//! Integration tests for the session lifecycle.
//!
//! These tests are implemented in:
//! `crates/rootlet-session/tests/session_test.rs`
//!
//! Covered scenarios:
//! - `base_mounts_follow_the_fixed_order`: Core mounts happen in sequence
//! - `second_entry_makes_no_new_mounts`: Re-entry is idempotent
//! - `teardown_unwinds_every_mount_in_reverse`: Cleanup runs in reverse order
//! - `keep_mounts_skips_teardown`: Mount ownership can be retained
//! - `external_init_guest_keeps_its_own_tmp_and_proc`: Init-managed guests
//! - `login_entry_materializes_the_share_template`: Share config template
//! - `locked_guest_is_rejected_before_any_mount`: Encrypted guest handling
//! - `guest_name_is_written_into_metadata`: Metadata refresh on entry
