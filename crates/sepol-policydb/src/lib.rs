//! # sepol-policydb: Binary kernel policy database
//!
//! This crate holds the data structures a compiled policy is made of and
//! the encoder that turns them into the kernel's binary format:
//! - Sparse bitmaps ([`Ebitmap`])
//! - Fixed-size chained hash tables ([`HashTab`]) and symbol tables ([`SymTab`])
//! - The access vector table ([`AvTab`])
//! - The expanded policy ([`PolicyDb`]) and its encoder ([`PolicyWriter`])
//! - Header inspection for existing policy files ([`PolicyHeader`])
//!
//! Everything here works on final kernel values; name resolution and
//! semantic checks happen in the front end before a [`PolicyDb`] is built.

pub mod avtab;
pub mod ebitmap;
mod error;
pub mod hashtab;
pub mod header;
pub mod policydb;
pub mod reader;
pub mod symtab;
pub mod write;

pub use avtab::{AvTab, AvTabDatum, AvTabKey, AvTabNodeRef, ExtendedPerms};
pub use ebitmap::Ebitmap;
pub use error::{PolicyDbError, Result};
pub use hashtab::{HashTab, SymHashTab, symhash};
pub use header::PolicyHeader;
pub use policydb::{PolicyDb, PolicyStats};
pub use reader::PolicyReader;
pub use symtab::{SymTab, Valued};
pub use write::PolicyWriter;
