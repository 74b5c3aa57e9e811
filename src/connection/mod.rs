//! Virtual connections and the registry that feeds them
//!
//! A [`VirtualConnection`] is what the TLS and HTTP layers read from and
//! write to. Its bytes never touch a socket: outbound chunks are handed to the
//! mixnet, inbound chunks arrive out-of-band and are pushed in through the
//! matching [`ConnectionInjector`], which only the [`ConnectionRegistry`]
//! holds.
//!
//! ```text
//!  host events ──► ConnectionRegistry ──► ConnectionInjector ─┐
//!  (id-keyed)        (id → injector)                          │ channels
//!                                                             ▼
//!  HTTP/TLS  ◄──────────────────────────────── VirtualConnection ──► mixnet
//! ```

mod registry;
mod virtual_conn;

pub use registry::ConnectionRegistry;
pub use virtual_conn::{
    ClientDataReceiver, ConnectionInjector, VirtualConnection, INBOUND_CHANNEL_CAPACITY,
    OUTBOUND_CHANNEL_CAPACITY,
};
