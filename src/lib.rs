//! A synchronous EtherCAT master and slave stack: the wire-level datagram
//! engine, the slave-side state machine, the CoE/SDO mailbox service and
//! the distributed-clock propagation-delay algorithm.
//!
//! This crate is split along the master/slave boundary described in the
//! core specification this stack implements:
//!
//! - [`bus`] -- the master's datagram engine and bus lifecycle (detect,
//!   configure, move slaves through their states, run SDO exchanges,
//!   enable distributed clocks).
//! - [`slave`], [`esm`], [`mailbox::response`] -- the slave-side runtime: a
//!   [`esm::StateMachine`] driving one [`esc::EscDevice`] through
//!   INIT/PRE_OP/SAFE_OP/OPERATIONAL, with [`slave::Device`] adding mailbox
//!   request servicing against an [`od::Dictionary`] on top.
//! - [`frame`], [`command`], [`wire`], [`register`] -- the wire format both
//!   sides share.
//! - [`mailbox`], [`coe`] -- the mailbox framing and CoE SDO protocol used
//!   by both the master's requestor side ([`mailbox::request`]) and the
//!   slave's responder side ([`mailbox::response`]).
//! - [`dc`] -- the distributed clock propagation-delay algorithm, pure and
//!   frame-IO-free; [`bus::Bus::enable_dc`] drives the frame round trips
//!   around it.
//! - [`ring`] -- the fixed-capacity FIFO the mailbox requestor and the
//!   datagram engine's in-flight table are built on.
//!
//! The raw link layer, ESC register access, SII/ESI parsing beyond
//! bootstrap identity fields, and any application/motor-control logic are
//! out of scope; see each module's own documentation for its slice of the
//! whole stack and [`DESIGN.md`](https://docs.rs) in the repository root
//! for what each module is grounded on.

pub mod al_status_code;
pub mod bus;
pub mod coe;
pub mod command;
pub mod dc;
pub mod error;
pub mod esc;
pub mod esm;
pub mod frame;
pub mod link;
pub mod mailbox;
pub mod od;
pub mod pdo;
pub mod register;
pub mod ring;
pub mod sii;
pub mod slave;
pub mod wire;

pub use bus::Bus;
pub use error::Error;
pub use esm::StateMachine;
pub use link::Link;
pub use ring::Ring;
pub use slave::Device;
