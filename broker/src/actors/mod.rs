//! Actor-based core: the broker owns all mutable turn state, the trail
//! actor persists experiment records, and draft generation runs in
//! spawned tasks reporting back through the broker's mailbox.

pub mod broker;
pub mod draft;
pub mod trail;
