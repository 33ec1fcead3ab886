pub mod shape_source;
