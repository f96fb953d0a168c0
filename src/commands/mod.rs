pub mod status;
pub mod stratify;
