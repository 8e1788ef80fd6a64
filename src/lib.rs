pub mod association;
pub mod bbox;
pub mod config;
pub mod detection;
pub mod entity;
pub mod error;
pub mod flow;
pub mod frame;
pub mod kinematics;
pub mod math;
pub mod motion;
pub mod pipeline;
pub mod possession;
pub mod rolling_avg;
pub mod stats;
pub mod team;
pub mod view;

mod circular_queue;

pub use config::PipelineConfig;
pub use detection::{Detection, EntityClass};
pub use entity::TrackedEntity;
pub use frame::Frame;
pub use pipeline::{FrameReport, MatchAnalyzer, Session};
pub use team::Team;

use std::rc::Rc;

/// Multi-stream front end. Every `src` gets its own independent state.
pub trait Tracking {
    fn update(&mut self, frames: &[Frame], src: &str) -> error::Result<Vec<FrameReport>>;
    fn entities(&self, src: &str) -> Rc<[TrackedEntity]>;
    fn close(&mut self, src: &str) -> bool;
}
