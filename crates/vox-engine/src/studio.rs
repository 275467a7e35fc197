//! Submix/effect-stack graph a studio's voices render into before reaching
//! the backend's main output bus.

use vox_audio::{Backend, BackendSubmix, SubmixHandle};

/// An effect stage in a studio's chain. Concrete DSP kernels (reverb, delay,
/// chorus) are out of scope; a studio only orders and applies opaque stages.
pub trait Effect: Send {
    fn apply(&mut self, buffer: &mut [f64], channels: u16);
}

/// A studio: one backend submix plus an auxiliary A/B pair for send effects,
/// and an ordered effect stack applied before the signal reaches the next
/// studio up the chain (or the main output).
pub struct Studio {
    main: SubmixHandle,
    aux_a: SubmixHandle,
    aux_b: SubmixHandle,
    effects: Vec<Box<dyn Effect>>,
}

impl Studio {
    pub fn new(backend: &mut dyn Backend) -> Self {
        Self {
            main: backend.allocate_submix(),
            aux_a: backend.allocate_submix(),
            aux_b: backend.allocate_submix(),
            effects: Vec::new(),
        }
    }

    pub fn main(&self) -> SubmixHandle {
        self.main
    }

    pub fn aux_a(&self) -> SubmixHandle {
        self.aux_a
    }

    pub fn aux_b(&self) -> SubmixHandle {
        self.aux_b
    }

    /// Whether a voice routed through this studio can still apply effects,
    /// i.e. the backend hasn't torn down its submixes out from under it.
    pub fn can_apply_effect(&self, backend: &mut dyn Backend) -> bool {
        backend.submix_mut(self.main).is_some()
    }

    pub fn push_effect(&mut self, effect: Box<dyn Effect>) {
        self.effects.push(effect);
    }

    pub fn apply_effects(&mut self, buffer: &mut [f64], channels: u16) {
        for effect in &mut self.effects {
            effect.apply(buffer, channels);
        }
    }

    pub fn set_aux_send(&self, backend: &mut dyn Backend, aux: SubmixHandle, level: f64) {
        if let Some(submix) = backend.submix_mut(aux) {
            submix.set_send_level(level);
        }
    }

    pub fn teardown(&self, backend: &mut dyn Backend) {
        backend.release_submix(self.main);
        backend.release_submix(self.aux_a);
        backend.release_submix(self.aux_b);
    }
}

fn _assert_backend_submix_object_safe(_: &dyn BackendSubmix) {}
