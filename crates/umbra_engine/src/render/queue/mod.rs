//! Render queue
//!
//! Renderables are queued into [`RenderQueueGroup`]s by id, then into
//! [`RenderPriorityGroup`]s by priority, then bucketed per pass. Groups and
//! priorities both iterate in ascending order.

mod priority_group;
mod queue_group;
mod render_queue;

pub use priority_group::{PassKey, RenderPriorityGroup, RenderablePass, RenderableList, SolidPassMap};
pub use queue_group::{RenderQueueGroup, RenderQueueGroupId};
pub use render_queue::{RenderQueue, DEFAULT_PRIORITY};
