pub mod fake_store;
