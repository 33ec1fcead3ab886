pub mod gtfs_static;
