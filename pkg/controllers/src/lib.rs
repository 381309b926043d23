pub mod globalquota;
