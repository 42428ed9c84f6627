//! Window input tracking and the per-frame snapshot handed to the frame driver.
//!
//! [`Input`] accumulates winit events between frames. Once per frame the
//! application calls [`Input::snapshot`] to produce a [`FrameInput`], a plain
//! value carrying everything the driver reacts to (movement, mouse look,
//! scroll, clicks, action keys), then [`Input::begin_frame`] to reset the
//! per-frame state. Scroll deltas travel inside the snapshot, so nothing is
//! shared between the event callback and the render loop.

use std::collections::HashSet;

use glam::{Vec2, Vec3};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Keys bound to one-shot actions.
pub const RELOAD_KEY: KeyCode = KeyCode::KeyR;
pub const PAUSE_KEY: KeyCode = KeyCode::KeyP;
pub const TEXTURES_KEY: KeyCode = KeyCode::KeyT;
pub const LIGHT_VOLUME_KEY: KeyCode = KeyCode::KeyL;
pub const EXIT_KEY: KeyCode = KeyCode::Escape;

/// One-shot actions triggered this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Actions {
    pub reload_shaders: bool,
    pub toggle_pause: bool,
    pub toggle_textures: bool,
    pub toggle_light_volume: bool,
    pub exit: bool,
}

/// Input state for a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInput {
    /// Seconds since the previous frame.
    pub dt: f32,
    /// Requested movement in camera space: x right, y up, z forward.
    pub movement: Vec3,
    /// Mouse motion in pixels while the look button is held.
    pub look: Vec2,
    /// Scroll wheel lines this frame.
    pub scroll: f32,
    /// Cursor position of a left click this frame, in physical pixels.
    pub click: Option<Vec2>,
    pub actions: Actions,
}

#[derive(Default)]
pub struct Input {
    keys_down: HashSet<KeyCode>,
    keys_pressed: HashSet<KeyCode>,
    mouse_buttons_down: HashSet<MouseButton>,
    mouse_buttons_pressed: HashSet<MouseButton>,
    mouse_position: Vec2,
    mouse_delta: Vec2,
    scroll_delta: f32,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the per-frame state. Call after taking the frame's snapshot.
    pub fn begin_frame(&mut self) {
        self.keys_pressed.clear();
        self.mouse_buttons_pressed.clear();
        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.key_event(key, event.state);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => {
                    if self.mouse_buttons_down.insert(*button) {
                        self.mouse_buttons_pressed.insert(*button);
                    }
                }
                ElementState::Released => {
                    self.mouse_buttons_down.remove(button);
                }
            },
            WindowEvent::CursorMoved { position, .. } => {
                let new_pos = Vec2::new(position.x as f32, position.y as f32);
                self.mouse_delta += new_pos - self.mouse_position;
                self.mouse_position = new_pos;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.scroll_delta += match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 120.0,
                };
            }
            WindowEvent::Focused(false) => {
                self.keys_down.clear();
                self.mouse_buttons_down.clear();
            }
            _ => {}
        }
    }

    fn key_event(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if self.keys_down.insert(key) {
                    self.keys_pressed.insert(key);
                }
            }
            ElementState::Released => {
                self.keys_down.remove(&key);
            }
        }
    }

    pub fn key_down(&self, key: KeyCode) -> bool {
        self.keys_down.contains(&key)
    }

    pub fn key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    pub fn mouse_down(&self, button: MouseButton) -> bool {
        self.mouse_buttons_down.contains(&button)
    }

    pub fn mouse_position(&self) -> Vec2 {
        self.mouse_position
    }

    /// Captures this frame's input as a value.
    pub fn snapshot(&self, dt: f32) -> FrameInput {
        let axis = |positive: KeyCode, negative: KeyCode| {
            self.key_down(positive) as i32 as f32 - self.key_down(negative) as i32 as f32
        };
        let movement = Vec3::new(
            axis(KeyCode::KeyD, KeyCode::KeyA),
            axis(KeyCode::KeyE, KeyCode::KeyQ),
            axis(KeyCode::KeyW, KeyCode::KeyS),
        );

        let look = if self.mouse_down(MouseButton::Right) {
            self.mouse_delta
        } else {
            Vec2::ZERO
        };

        let click = self
            .mouse_buttons_pressed
            .contains(&MouseButton::Left)
            .then_some(self.mouse_position);

        FrameInput {
            dt,
            movement,
            look,
            scroll: self.scroll_delta,
            click,
            actions: Actions {
                reload_shaders: self.key_pressed(RELOAD_KEY),
                toggle_pause: self.key_pressed(PAUSE_KEY),
                toggle_textures: self.key_pressed(TEXTURES_KEY),
                toggle_light_volume: self.key_pressed(LIGHT_VOLUME_KEY),
                exit: self.key_pressed(EXIT_KEY),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_maps_keys_to_actions_and_axes() {
        let mut input = Input::new();
        input.key_event(KeyCode::KeyW, ElementState::Pressed);
        input.key_event(KeyCode::KeyA, ElementState::Pressed);
        input.key_event(RELOAD_KEY, ElementState::Pressed);

        let frame = input.snapshot(0.016);
        assert_eq!(frame.movement, Vec3::new(-1.0, 0.0, 1.0));
        assert!(frame.actions.reload_shaders);
        assert!(!frame.actions.toggle_pause);
        assert_eq!(frame.click, None);

        input.begin_frame();
        let next = input.snapshot(0.016);
        assert!(!next.actions.reload_shaders);
        assert_eq!(next.movement, Vec3::new(-1.0, 0.0, 1.0));
    }

    #[test]
    fn held_key_does_not_repeat_action() {
        let mut input = Input::new();
        input.key_event(PAUSE_KEY, ElementState::Pressed);
        input.begin_frame();
        input.key_event(PAUSE_KEY, ElementState::Pressed);
        assert!(!input.snapshot(0.0).actions.toggle_pause);
    }
}
