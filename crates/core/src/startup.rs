//! RCON startup commands derived from the pregeneration radius and world border size.
//!
//! Commands target the Chunky and ChunkyBorder plugins. Segments are kept in
//! insertion order and joined with a single comma; pregeneration always comes
//! before the border.

use smallvec::SmallVec;

/// Separator between startup command segments.
pub const SEPARATOR: &str = ",";

/// World the pregeneration runs against.
const PREGEN_WORLD: &str = "world";

/// Ordered list of command segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupCommands {
    segments: SmallVec<[String; 5]>,
}

impl StartupCommands {
    pub fn new() -> Self { Self::default() }

    /// Add the four-part Chunky pregeneration sequence centered on 0,0.
    /// Absent or non-positive radius adds nothing.
    pub fn pregen(mut self, radius: Option<i32>) -> Self {
        if let Some(r) = radius.filter(|r| *r > 0) {
            self.segments.push(format!("chunky world {}", PREGEN_WORLD));
            self.segments.push("chunky center 0 0".to_string());
            self.segments.push(format!("chunky radius {}", r));
            self.segments.push("chunky start".to_string());
        }
        self
    }

    /// Add a circular ChunkyBorder. Absent or non-positive size adds nothing.
    pub fn border(mut self, size: Option<i32>) -> Self {
        if let Some(s) = size.filter(|s| *s > 0) {
            self.segments.push(format!("chunkyborder set circle {}", s));
        }
        self
    }

    pub fn segments(&self) -> &[String] { &self.segments }

    pub fn is_empty(&self) -> bool { self.segments.is_empty() }

    pub fn render(&self) -> String { self.segments.join(SEPARATOR) }
}

/// Startup command string for a server. Depends on nothing but these two inputs.
pub fn rcon_startup_commands(pregen_radius: Option<i32>, world_border_size: Option<i32>) -> String {
    StartupCommands::new().pregen(pregen_radius).border(world_border_size).render()
}
