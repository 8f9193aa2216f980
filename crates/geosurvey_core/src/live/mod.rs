//! Change notification and reactive reads.
//!
//! Writers publish the tables they touched on a shared `ChangeBus`; screens
//! hold `LiveQuery` values that reload only when one of their tables moved.

pub mod bus;
pub mod query;

pub use bus::{ChangeBus, DataTable, SubscriptionId};
pub use query::{
    load_observation_feed, observation_feed_query, observations_by_object_type,
    project_list_query, project_tree_query, LiveQuery, ObservationFeedItem, ObservationGroup,
    VisibilityFilter,
};
