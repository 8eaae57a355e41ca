pub mod redb_registry;
