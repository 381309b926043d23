pub mod admission;
pub mod globalquotas;
pub mod metrics;
pub mod namespaces;
pub mod resourcequotas;
pub mod watch;
