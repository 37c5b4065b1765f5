//! # File Formats
//!
//! Readers and writers for every tabular file the engine exchanges with the
//! outside world:
//! - `connectivity`: the four connectivity matrix shapes (Matrix Normalizer)
//! - `table`: generic delimited tables used for optimizer files that carry
//!   columns the engine does not interpret (pu.dat, spec.dat, puvspr.dat)
//! - `geometry`: unit geometry documents

pub mod connectivity;
pub mod geometry;
pub mod table;

pub use connectivity::{
    ConnectivityData, MatrixFormat, TemporalConnectivity, TypedConnectivity, check_matrix_type,
    parse_connectivity, read_connectivity, write_connectivity, write_mean_of_times,
};
pub use geometry::{GeometryDocument, UnitGeometry, read_geometry};
pub use table::{Table, detect_delimiter};
