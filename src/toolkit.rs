pub mod mat_query;
pub mod mock_sim;

pub use mat_query::MatQuery;
pub use mock_sim::MockSim;
