use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Result};
use phosphor_smoke::remap::{
    CaptureRegistry, DeltaMode, DispatchOutcome, ElementId, Modifiers, PointerInput, PointerKind,
    PointerPhase, SyntheticEvent, SyntheticKind, WheelDelta, WheelInput,
};
use phosphor_smoke::{
    is_device_lost, overlay_text, ControlMessage, Effect, EffectConfig, Frame, InputHost,
    ObstacleSource, Presenter, RawInput, Rect, Remapper, SnapshotScheduler, SnapshotSource, Vec2,
};
use winit::{
    event::{
        ElementState, Event, MouseButton, MouseScrollDelta, TouchPhase, VirtualKeyCode, WindowEvent,
    },
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

const PAGE_BACKGROUND: [f32; 4] = [0.05, 0.05, 0.07, 1.0];
const CARD_COLOR: [f32; 4] = [0.16, 0.17, 0.22, 1.0];
const CARD_HOVER_COLOR: [f32; 4] = [0.24, 0.27, 0.36, 1.0];
const BUTTON_COLOR: [f32; 4] = [0.55, 0.32, 0.18, 1.0];
const TEXT_COLOR: [f32; 4] = [0.92, 0.92, 0.88, 1.0];
const SNAPSHOT_SCALE: f32 = 0.5;
const SLIDER_STEP: f32 = 0.1;
const MOUSE_POINTER_ID: u64 = 1;
const TOUCH_POINTER_BASE: u64 = 16;

#[derive(Clone, Debug)]
struct PageElement {
    id: ElementId,
    parent: Option<ElementId>,
    bounds: Rect,
    label: &'static str,
    is_obstacle: bool,
    hovered: bool,
    clicks: u32,
}

/// A handful of cards laid out over the viewport. The smoke flows around
/// them and pointer input reaches them through the lens.
#[derive(Clone, Debug)]
struct PageLayout {
    size: (u32, u32),
    elements: Vec<PageElement>,
}

impl PageLayout {
    fn new(size: (u32, u32)) -> Self {
        let mut layout = Self {
            size,
            elements: Vec::new(),
        };
        layout.relayout(size);
        layout
    }

    fn relayout(&mut self, size: (u32, u32)) {
        self.size = size;
        let (w, h) = (size.0 as f32, size.1 as f32);
        let card_w = w * 0.24;
        let card_h = h * 0.16;
        let gap = w * 0.05;
        let top = h * 0.2;
        let row_left = (w - 3.0 * card_w - 2.0 * gap) * 0.5;
        let card = |i: usize| Rect::new(row_left + i as f32 * (card_w + gap), top, card_w, card_h);
        let button = {
            let c = card(1);
            Rect::new(c.x + c.width * 0.2, c.y + c.height * 0.55, c.width * 0.6, c.height * 0.3)
        };
        let previous = std::mem::take(&mut self.elements);
        let keep = |id: u64| previous.iter().find(|e| e.id.0 == id);
        let element = |id: u64, parent: Option<u64>, bounds: Rect, label, is_obstacle| {
            let old = keep(id);
            PageElement {
                id: ElementId(id),
                parent: parent.map(ElementId),
                bounds,
                label,
                is_obstacle,
                hovered: old.map_or(false, |e| e.hovered),
                clicks: old.map_or(0, |e| e.clicks),
            }
        };
        self.elements = vec![
            element(0, None, Rect::new(0.0, 0.0, w, h), "", false),
            element(1, Some(0), card(0), "ABOUT", true),
            element(2, Some(0), card(1), "WORK", true),
            element(3, Some(0), card(2), "CONTACT", true),
            element(4, Some(2), button, "OPEN", false),
        ];
    }

    fn get_mut(&mut self, id: ElementId) -> Option<&mut PageElement> {
        self.elements.iter_mut().find(|e| e.id == id)
    }

    fn draw(&self, scale: f32) -> Frame {
        let width = ((self.size.0 as f32 * scale).round() as usize).max(1);
        let height = ((self.size.1 as f32 * scale).round() as usize).max(1);
        let mut frame = Frame::new(width, height, PAGE_BACKGROUND);
        for element in self.elements.iter().filter(|e| e.parent.is_some()) {
            let color = if element.id == ElementId(4) {
                BUTTON_COLOR
            } else if element.hovered {
                CARD_HOVER_COLOR
            } else {
                CARD_COLOR
            };
            let x0 = (element.bounds.x * scale).max(0.0) as usize;
            let y0 = (element.bounds.y * scale).max(0.0) as usize;
            let x1 = ((element.bounds.right() * scale) as usize).min(width);
            let y1 = ((element.bounds.bottom() * scale) as usize).min(height);
            for y in y0..y1 {
                for x in x0..x1 {
                    frame.set(x, y, color);
                }
            }
            let label = if element.clicks > 0 {
                format!("{} {}", element.label, element.clicks)
            } else {
                element.label.to_string()
            };
            overlay_text(&mut frame, x0 + 4, y0 + 4, &label, TEXT_COLOR, 2);
        }
        frame
    }
}

struct Page {
    layout: Arc<Mutex<PageLayout>>,
    overlay_hit_testable: bool,
    dirty: bool,
}

impl Page {
    fn new(size: (u32, u32)) -> Self {
        Self {
            layout: Arc::new(Mutex::new(PageLayout::new(size))),
            overlay_hit_testable: true,
            dirty: true,
        }
    }

    fn with_layout<T>(&self, f: impl FnOnce(&mut PageLayout) -> T) -> Option<T> {
        match self.layout.lock() {
            Ok(mut layout) => Some(f(&mut layout)),
            Err(_) => {
                log::error!("page layout lock poisoned");
                None
            }
        }
    }

    fn resize(&mut self, size: (u32, u32)) {
        self.with_layout(|layout| layout.relayout(size));
        self.dirty = true;
    }

    fn snapshot_source(&self) -> Arc<dyn SnapshotSource> {
        Arc::new(PageSnapshot(Arc::clone(&self.layout)))
    }

    fn obstacle_source(&self) -> Box<dyn ObstacleSource> {
        Box::new(PageObstacles(Arc::clone(&self.layout)))
    }

    fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// Live view of the card bounds, polled by the effect on its resample timer.
struct PageObstacles(Arc<Mutex<PageLayout>>);

impl ObstacleSource for PageObstacles {
    fn obstacle_bounds(&self) -> Vec<Rect> {
        match self.0.lock() {
            Ok(layout) => layout
                .elements
                .iter()
                .filter(|e| e.is_obstacle)
                .map(|e| e.bounds)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl InputHost for Page {
    fn surface_rect(&self) -> Rect {
        self.with_layout(|layout| Rect::new(0.0, 0.0, layout.size.0 as f32, layout.size.1 as f32))
            .unwrap_or_default()
    }

    fn overlay_hit_testable(&self) -> bool {
        self.overlay_hit_testable
    }

    fn set_overlay_hit_testable(&mut self, hit_testable: bool) {
        self.overlay_hit_testable = hit_testable;
    }

    fn element_at(&self, position: Vec2) -> Option<ElementId> {
        self.with_layout(|layout| {
            layout
                .elements
                .iter()
                .rev()
                .find(|e| e.bounds.contains(position))
                .map(|e| e.id)
        })
        .flatten()
    }

    fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.with_layout(|layout| {
            layout
                .elements
                .iter()
                .find(|e| e.id == element)
                .and_then(|e| e.parent)
        })
        .flatten()
    }

    fn is_connected(&self, element: ElementId) -> bool {
        self.with_layout(|layout| layout.elements.iter().any(|e| e.id == element))
            .unwrap_or(false)
    }

    fn dispatch(&mut self, event: &SyntheticEvent, capture: &mut CaptureRegistry) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let changed = self
            .with_layout(|layout| {
                let Some(element) = layout.get_mut(event.target) else {
                    return false;
                };
                match event.kind {
                    SyntheticKind::PointerEnter => {
                        element.hovered = true;
                        true
                    }
                    SyntheticKind::PointerLeave => {
                        element.hovered = false;
                        true
                    }
                    SyntheticKind::PointerDown if element.id == ElementId(4) => {
                        capture.set(event.pointer_id, element.id);
                        false
                    }
                    SyntheticKind::PointerUp => {
                        capture.release(event.pointer_id, element.id);
                        false
                    }
                    SyntheticKind::Click if element.parent.is_some() => {
                        element.clicks += 1;
                        log::info!("{} clicked (detail {})", element.label, event.detail);
                        true
                    }
                    SyntheticKind::ContextMenu => {
                        outcome.default_prevented = true;
                        false
                    }
                    _ => false,
                }
            })
            .unwrap_or(false);
        self.dirty |= changed;
        outcome
    }
}

struct PageSnapshot(Arc<Mutex<PageLayout>>);

impl SnapshotSource for PageSnapshot {
    fn capture(&self) -> Result<Frame> {
        let layout = self
            .0
            .lock()
            .map_err(|_| anyhow!("page layout lock poisoned"))?
            .clone();
        Ok(layout.draw(SNAPSHOT_SCALE))
    }
}

/// Converts winit pointer state into remapper input.
#[derive(Default)]
struct PointerTracker {
    position: Vec2,
    buttons: u16,
    modifiers: Modifiers,
}

impl PointerTracker {
    fn pointer(&self, phase: PointerPhase, button: i16) -> RawInput {
        let mut input = PointerInput::new(phase, MOUSE_POINTER_ID, PointerKind::Mouse, self.position)
            .with_button(button);
        input.buttons = self.buttons;
        input.modifiers = self.modifiers;
        RawInput::Pointer(input)
    }

    fn moved(&mut self, position: Vec2) -> RawInput {
        self.position = position;
        self.pointer(PointerPhase::Move, -1)
    }

    fn button(&mut self, state: ElementState, button: MouseButton) -> Option<RawInput> {
        let index: i16 = match button {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
            MouseButton::Other(_) => return None,
        };
        // DOM button masks swap middle and right relative to the indices.
        let mask = match index {
            0 => 1,
            1 => 4,
            _ => 2,
        };
        let phase = match state {
            ElementState::Pressed => {
                self.buttons |= mask;
                PointerPhase::Down
            }
            ElementState::Released => {
                self.buttons &= !mask;
                PointerPhase::Up
            }
        };
        Some(self.pointer(phase, index))
    }

    fn wheel(&self, delta: MouseScrollDelta) -> RawInput {
        let delta = match delta {
            MouseScrollDelta::LineDelta(x, y) => WheelDelta {
                x: -x,
                y: -y,
                z: 0.0,
                mode: DeltaMode::Line,
            },
            MouseScrollDelta::PixelDelta(p) => WheelDelta {
                x: -p.x as f32,
                y: -p.y as f32,
                z: 0.0,
                mode: DeltaMode::Pixel,
            },
        };
        RawInput::Wheel(WheelInput {
            position: self.position,
            delta,
            buttons: self.buttons,
            modifiers: self.modifiers,
        })
    }
}

fn touch_input(phase: TouchPhase, id: u64, position: Vec2) -> RawInput {
    let phase = match phase {
        TouchPhase::Started => PointerPhase::Down,
        TouchPhase::Moved => PointerPhase::Move,
        TouchPhase::Ended => PointerPhase::Up,
        TouchPhase::Cancelled => PointerPhase::Cancel,
    };
    let mut input = PointerInput::new(phase, TOUCH_POINTER_BASE + id, PointerKind::Touch, position);
    input.is_primary = id == 0;
    RawInput::Pointer(input)
}

fn create_presenter(window: &Window, effect: &Effect) -> Option<Presenter> {
    let (width, height) = effect.output().size();
    match Presenter::new(window, (width as u32, height as u32)) {
        Ok(presenter) => Some(presenter),
        Err(err) => {
            log::error!("presenter unavailable, running without display: {err:#}");
            None
        }
    }
}

fn window_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width.max(1), size.height.max(1))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = EffectConfig::from_env()?;
    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("Phosphor Smoke")
        .with_inner_size(winit::dpi::LogicalSize::new(960.0, 720.0))
        .build(&event_loop)?;
    let viewport = window_size(&window);
    let mut page = Page::new(viewport);
    let mut scheduler = SnapshotScheduler::new(page.snapshot_source(), config.capture.min_interval_ms);
    let mut effect = Effect::init(config, viewport)?;
    effect.set_obstacle_source(page.obstacle_source());
    let mut presenter = create_presenter(&window, &effect);
    let mut remapper = Remapper::new();
    let mut pointer = PointerTracker::default();
    let start = Instant::now();
    let mut effect_slot = Some(effect);

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        let now_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Event::LoopDestroyed = event {
            scheduler.cancel();
            presenter = None;
            if let Some(effect) = effect_slot.take() {
                effect.dispose();
            }
            return;
        }
        let Some(effect) = effect_slot.as_mut() else {
            return;
        };
        let mut raw_input = None;
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::Resized(size) => {
                    if size.width == 0 || size.height == 0 {
                        return;
                    }
                    let viewport = (size.width, size.height);
                    effect.resize(viewport);
                    page.resize(viewport);
                    remapper.reset();
                    let (width, height) = effect.output().size();
                    let resized = presenter
                        .as_mut()
                        .map(|active| active.resize(viewport, (width as u32, height as u32)));
                    if let Some(Err(err)) = resized {
                        log::warn!("presenter resize failed, rebuilding: {err:#}");
                        presenter = None;
                        presenter = create_presenter(&window, effect);
                    }
                }
                WindowEvent::KeyboardInput { input, .. } => {
                    if input.state != ElementState::Pressed {
                        return;
                    }
                    let state = effect.state();
                    let message = match input.virtual_keycode {
                        Some(VirtualKeyCode::Escape) => {
                            *control_flow = ControlFlow::Exit;
                            None
                        }
                        Some(VirtualKeyCode::G) => {
                            Some(ControlMessage::WarpEnabled(!state.warp_enabled))
                        }
                        Some(VirtualKeyCode::D) => Some(ControlMessage::Debug(!state.debug)),
                        Some(VirtualKeyCode::R) => {
                            Some(ControlMessage::ReducedMotion(!state.reduced_motion))
                        }
                        Some(VirtualKeyCode::Up) => {
                            Some(ControlMessage::WarpSlider(state.warp_slider + SLIDER_STEP))
                        }
                        Some(VirtualKeyCode::Down) => {
                            Some(ControlMessage::WarpSlider(state.warp_slider - SLIDER_STEP))
                        }
                        _ => None,
                    };
                    if let Some(message) = message {
                        log::info!("control: {message:?}");
                        effect.apply(message);
                    }
                }
                WindowEvent::ModifiersChanged(state) => {
                    pointer.modifiers = Modifiers {
                        shift: state.shift(),
                        ctrl: state.ctrl(),
                        alt: state.alt(),
                        meta: state.logo(),
                    };
                }
                WindowEvent::CursorMoved { position, .. } => {
                    raw_input = Some(pointer.moved(Vec2::new(position.x as f32, position.y as f32)));
                }
                WindowEvent::CursorLeft { .. } => {
                    raw_input = Some(pointer.pointer(PointerPhase::Leave, -1));
                }
                WindowEvent::MouseInput { state, button, .. } => {
                    raw_input = pointer.button(state, button);
                }
                WindowEvent::MouseWheel { delta, .. } => {
                    raw_input = Some(pointer.wheel(delta));
                }
                WindowEvent::Touch(touch) => {
                    let position = Vec2::new(touch.location.x as f32, touch.location.y as f32);
                    raw_input = Some(touch_input(touch.phase, touch.id, position));
                }
                WindowEvent::Focused(false) => {
                    raw_input = Some(RawInput::LostCapture {
                        pointer_id: MOUSE_POINTER_ID,
                    });
                }
                _ => {}
            },
            Event::MainEventsCleared => window.request_redraw(),
            Event::RedrawRequested(_) => {
                if page.take_dirty() {
                    scheduler.request();
                    effect.invalidate_obstacles();
                }
                if let Some(snapshot) = scheduler.poll(now_ms) {
                    effect.set_snapshot(snapshot);
                }
                let frame = effect.frame(now_ms);
                if let Some(active) = presenter.as_mut() {
                    let result = active.update_texture(frame).and_then(|_| active.render());
                    if let Err(err) = result {
                        if is_device_lost(&err) {
                            log::warn!("device lost, rebuilding presenter");
                            presenter = None;
                            presenter = create_presenter(&window, effect);
                        } else {
                            log::error!("render error: {err:#}");
                        }
                    }
                }
            }
            _ => {}
        }
        if let Some(input) = raw_input {
            let lens = effect.lens_params();
            let handled = remapper.handle(&mut page, &input, &lens, now_ms);
            if let Some(target) = handled.target {
                log::trace!("input {input:?} forwarded to {target:?}");
            }
        }
    });
}
