mod bus_types;
mod d_sbr_dv;
mod d_sbus_dv;
mod error;
mod jac;
mod loadcase;
mod mpopt;
mod network;
mod newton;
mod opf;
mod pf;
mod results;
mod sbus;
mod traits;
mod vsc;
mod ybus;
mod zip;

pub mod debug;
pub mod ipm;
pub mod math;

pub use bus_types::*;
pub use d_sbr_dv::*;
pub use d_sbus_dv::*;
pub use error::*;
pub use ipm::{nlp, Solution, Status};
pub use jac::*;
pub use loadcase::*;
pub use mpopt::*;
pub use network::*;
pub use newton::*;
pub use opf::*;
pub use pf::*;
pub use results::*;
pub use sbus::*;
pub use traits::*;
pub use vsc::*;
pub use ybus::*;
pub use zip::*;

#[cfg(test)]
mod tests;
