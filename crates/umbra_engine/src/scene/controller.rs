//! Per-frame controllers
//!
//! Controllers animate scene state (transforms, pass colours, light
//! positions) before each frame is rendered. Any `FnMut(f32, &mut T)` closure
//! is a controller.

/// Something updated once per frame with the elapsed time
pub trait Controller<T: ?Sized> {
    /// Advance by `delta_time` seconds
    fn update(&mut self, delta_time: f32, target: &mut T);

    /// True once the controller has nothing left to do and can be dropped
    fn is_finished(&self) -> bool {
        false
    }
}

impl<T: ?Sized, F: FnMut(f32, &mut T)> Controller<T> for F {
    fn update(&mut self, delta_time: f32, target: &mut T) {
        self(delta_time, target);
    }
}

/// Owns controllers and runs them in registration order
pub struct ControllerManager<T: ?Sized> {
    controllers: Vec<Box<dyn Controller<T>>>,
    time_factor: f32,
    elapsed: f32,
}

impl<T: ?Sized> Default for ControllerManager<T> {
    fn default() -> Self {
        Self { controllers: Vec::new(), time_factor: 1.0, elapsed: 0.0 }
    }
}

impl<T: ?Sized> std::fmt::Debug for ControllerManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerManager")
            .field("controllers", &self.controllers.len())
            .field("time_factor", &self.time_factor)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

impl<T: ?Sized> ControllerManager<T> {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller
    pub fn add(&mut self, controller: impl Controller<T> + 'static) {
        self.controllers.push(Box::new(controller));
    }

    /// Scale applied to every delta; 0 pauses all controllers
    pub fn set_time_factor(&mut self, factor: f32) {
        self.time_factor = factor.max(0.0);
    }

    /// Current time scale
    pub const fn time_factor(&self) -> f32 {
        self.time_factor
    }

    /// Scaled seconds accumulated over every update
    pub const fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Number of live controllers
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// True if no controller is registered
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Run every controller, then drop the finished ones
    pub fn update(&mut self, delta_time: f32, target: &mut T) {
        let scaled = delta_time * self.time_factor;
        self.elapsed += scaled;
        for controller in &mut self.controllers {
            controller.update(scaled, target);
        }
        let before = self.controllers.len();
        self.controllers.retain(|controller| !controller.is_finished());
        let finished = before - self.controllers.len();
        if finished > 0 {
            log::trace!("Dropped {} finished controllers", finished);
        }
    }

    /// Move every controller of `other` to the end of this manager
    pub fn append(&mut self, other: &mut Self) {
        self.controllers.append(&mut other.controllers);
    }

    /// Remove every controller
    pub fn clear(&mut self) {
        self.controllers.clear();
    }
}
