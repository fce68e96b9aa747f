/*
 * Intrusive Collections
 *
 * Containers whose nodes live inside the objects they organize. The
 * scheduler threads its ready queue, sleep queue, waiter lists and donation
 * lists through hooks embedded in the thread control block, so enqueueing a
 * thread never allocates and never fails.
 */

pub mod list;

pub use list::{List, ListLink};
