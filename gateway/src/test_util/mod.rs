//! Builders for the payloads mock nodes speak in tests.

pub mod mock_node;
