//! Pointer remapping through the lens.
//!
//! Raw input lands on the overlay surface at screen positions. The remapper
//! moves each position back into content space, hit-tests the element layer
//! underneath and re-dispatches equivalent events there, keeping hover paths,
//! pointer capture and click counting per pointer.

use crate::lens::LensParams;
use crate::obstacle::Rect;
use crate::Vec2;
use std::collections::{HashMap, HashSet};

pub const CLICK_INTERVAL_MS: f64 = 500.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Pen,
    Touch,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
    Leave,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerInput {
    pub phase: PointerPhase,
    pub pointer_id: u64,
    pub kind: PointerKind,
    /// Client position in pixels.
    pub position: Vec2,
    /// Button that changed: 0 primary, 1 auxiliary, 2 secondary, -1 none.
    pub button: i16,
    /// Bitmask of buttons held after this event.
    pub buttons: u16,
    pub modifiers: Modifiers,
    pub is_primary: bool,
}

impl PointerInput {
    pub fn new(phase: PointerPhase, pointer_id: u64, kind: PointerKind, position: Vec2) -> Self {
        let (button, buttons) = match phase {
            PointerPhase::Down => (0, 1),
            PointerPhase::Up => (0, 0),
            _ => (-1, 0),
        };
        Self {
            phase,
            pointer_id,
            kind,
            position,
            button,
            buttons,
            modifiers: Modifiers::default(),
            is_primary: true,
        }
    }

    pub fn with_button(mut self, button: i16) -> Self {
        self.button = button;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaMode {
    Pixel,
    Line,
    Page,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WheelDelta {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub mode: DeltaMode,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WheelInput {
    pub position: Vec2,
    pub delta: WheelDelta,
    pub buttons: u16,
    pub modifiers: Modifiers,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawInput {
    Pointer(PointerInput),
    Wheel(WheelInput),
    /// The platform revoked capture for a pointer.
    LostCapture { pointer_id: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyntheticKind {
    PointerOver,
    PointerEnter,
    PointerDown,
    PointerMove,
    PointerUp,
    PointerCancel,
    PointerOut,
    PointerLeave,
    MouseOver,
    MouseEnter,
    MouseDown,
    MouseMove,
    MouseUp,
    MouseOut,
    MouseLeave,
    Click,
    DblClick,
    AuxClick,
    ContextMenu,
    Wheel,
}

impl SyntheticKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::PointerOver => "pointerover",
            Self::PointerEnter => "pointerenter",
            Self::PointerDown => "pointerdown",
            Self::PointerMove => "pointermove",
            Self::PointerUp => "pointerup",
            Self::PointerCancel => "pointercancel",
            Self::PointerOut => "pointerout",
            Self::PointerLeave => "pointerleave",
            Self::MouseOver => "mouseover",
            Self::MouseEnter => "mouseenter",
            Self::MouseDown => "mousedown",
            Self::MouseMove => "mousemove",
            Self::MouseUp => "mouseup",
            Self::MouseOut => "mouseout",
            Self::MouseLeave => "mouseleave",
            Self::Click => "click",
            Self::DblClick => "dblclick",
            Self::AuxClick => "auxclick",
            Self::ContextMenu => "contextmenu",
            Self::Wheel => "wheel",
        }
    }

    pub fn bubbles(self) -> bool {
        !matches!(
            self,
            Self::PointerEnter | Self::PointerLeave | Self::MouseEnter | Self::MouseLeave
        )
    }

    pub fn cancelable(self) -> bool {
        !matches!(
            self,
            Self::PointerEnter
                | Self::PointerLeave
                | Self::PointerCancel
                | Self::MouseEnter
                | Self::MouseLeave
        )
    }

    fn mouse_compat(self) -> Option<Self> {
        match self {
            Self::PointerOver => Some(Self::MouseOver),
            Self::PointerEnter => Some(Self::MouseEnter),
            Self::PointerDown => Some(Self::MouseDown),
            Self::PointerMove => Some(Self::MouseMove),
            Self::PointerUp => Some(Self::MouseUp),
            Self::PointerOut => Some(Self::MouseOut),
            Self::PointerLeave => Some(Self::MouseLeave),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticEvent {
    pub kind: SyntheticKind,
    pub target: ElementId,
    pub related_target: Option<ElementId>,
    pub pointer_id: u64,
    pub pointer_kind: PointerKind,
    /// Remapped client position in pixels.
    pub position: Vec2,
    pub button: i16,
    pub buttons: u16,
    pub modifiers: Modifiers,
    pub is_primary: bool,
    pub detail: u32,
    pub wheel: Option<WheelDelta>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub default_prevented: bool,
}

/// The element layer as seen by the remapper.
pub trait InputHost {
    /// Overlay surface bounds in client pixels.
    fn surface_rect(&self) -> Rect;
    fn overlay_hit_testable(&self) -> bool;
    fn set_overlay_hit_testable(&mut self, hit_testable: bool);
    /// Innermost element at a client position.
    fn element_at(&self, position: Vec2) -> Option<ElementId>;
    fn parent(&self, element: ElementId) -> Option<ElementId>;
    fn is_connected(&self, element: ElementId) -> bool;
    /// Delivers an event. Handlers may claim pointer capture through
    /// `capture`.
    fn dispatch(&mut self, event: &SyntheticEvent, capture: &mut CaptureRegistry) -> DispatchOutcome;
}

/// Makes the overlay transparent to hit testing for its lifetime.
struct OverlayPassThrough<'a, H: InputHost + ?Sized> {
    host: &'a mut H,
    previous: bool,
}

impl<'a, H: InputHost + ?Sized> OverlayPassThrough<'a, H> {
    fn new(host: &'a mut H) -> Self {
        let previous = host.overlay_hit_testable();
        host.set_overlay_hit_testable(false);
        Self { host, previous }
    }
}

impl<H: InputHost + ?Sized> Drop for OverlayPassThrough<'_, H> {
    fn drop(&mut self) {
        self.host.set_overlay_hit_testable(self.previous);
    }
}

/// Element under `position` with the overlay removed from hit testing.
pub fn hit_test<H: InputHost + ?Sized>(host: &mut H, position: Vec2) -> Option<ElementId> {
    let guard = OverlayPassThrough::new(host);
    let hit = guard.host.element_at(position);
    drop(guard);
    hit
}

/// Maps a client position on the overlay to the matching position in the
/// element layer. Identity coefficients return the input unchanged.
pub fn remap_position(position: Vec2, surface: Rect, lens: &LensParams) -> Vec2 {
    if lens.is_identity() || surface.width <= 0.0 || surface.height <= 0.0 {
        return position;
    }
    let origin = Vec2::new(surface.x, surface.y);
    let size = Vec2::new(surface.width, surface.height);
    let uv = Vec2::new(
        (position.x - origin.x) / size.x,
        (position.y - origin.y) / size.y,
    );
    if !uv.is_finite() {
        return position;
    }
    origin.add(lens.undistort(uv).mul(size))
}

/// Ancestor chain, outermost first.
fn element_path<H: InputHost + ?Sized>(host: &H, element: Option<ElementId>) -> Vec<ElementId> {
    let mut path = Vec::new();
    let mut cursor = element;
    while let Some(id) = cursor {
        if path.contains(&id) {
            break;
        }
        path.push(id);
        cursor = host.parent(id);
    }
    path.reverse();
    path
}

fn contains<H: InputHost + ?Sized>(host: &H, ancestor: ElementId, element: ElementId) -> bool {
    element_path(host, Some(element)).contains(&ancestor)
}

#[derive(Clone, Debug, Default)]
pub struct CaptureRegistry {
    targets: HashMap<u64, ElementId>,
}

impl CaptureRegistry {
    pub fn set(&mut self, pointer_id: u64, element: ElementId) {
        self.targets.insert(pointer_id, element);
    }

    /// Releases only if `element` holds the capture.
    pub fn release(&mut self, pointer_id: u64, element: ElementId) -> bool {
        if self.targets.get(&pointer_id) == Some(&element) {
            self.targets.remove(&pointer_id);
            true
        } else {
            false
        }
    }

    pub fn has(&self, pointer_id: u64, element: ElementId) -> bool {
        self.targets.get(&pointer_id) == Some(&element)
    }

    pub fn target(&self, pointer_id: u64) -> Option<ElementId> {
        self.targets.get(&pointer_id).copied()
    }

    pub fn clear(&mut self, pointer_id: u64) {
        self.targets.remove(&pointer_id);
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct HoverState {
    target: Option<ElementId>,
    path: Vec<ElementId>,
}

#[derive(Clone, Debug, Default)]
pub struct HoverTracker {
    pointers: HashMap<u64, HoverState>,
}

impl HoverTracker {
    pub fn target(&self, pointer_id: u64) -> Option<ElementId> {
        self.pointers.get(&pointer_id).and_then(|state| state.target)
    }

    pub fn path(&self, pointer_id: u64) -> &[ElementId] {
        self.pointers
            .get(&pointer_id)
            .map(|state| state.path.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClickCounter {
    last: Option<(ElementId, i16, f64)>,
    count: u32,
}

impl ClickCounter {
    /// Returns the click detail for a click on `target` at `now_ms`.
    pub fn register(&mut self, target: ElementId, button: i16, now_ms: f64) -> u32 {
        self.count = match self.last {
            Some((last_target, last_button, last_ms))
                if last_target == target
                    && last_button == button
                    && now_ms - last_ms <= CLICK_INTERVAL_MS =>
            {
                self.count + 1
            }
            _ => 1,
        };
        self.last = Some((target, button, now_ms));
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What the caller should do with the original overlay event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Handled {
    /// An equivalent event reached the element layer; stop the original.
    pub stop_propagation: bool,
    pub prevent_default: bool,
    pub target: Option<ElementId>,
}

#[derive(Clone, Copy, Debug)]
struct PointerContext {
    pointer_id: u64,
    kind: PointerKind,
    position: Vec2,
    button: i16,
    buttons: u16,
    modifiers: Modifiers,
    is_primary: bool,
}

impl PointerContext {
    fn from_input(input: &PointerInput, position: Vec2) -> Self {
        Self {
            pointer_id: input.pointer_id,
            kind: input.kind,
            position,
            button: input.button,
            buttons: input.buttons,
            modifiers: input.modifiers,
            is_primary: input.is_primary,
        }
    }

    fn event(
        &self,
        kind: SyntheticKind,
        target: ElementId,
        related_target: Option<ElementId>,
        detail: u32,
    ) -> SyntheticEvent {
        SyntheticEvent {
            kind,
            target,
            related_target,
            pointer_id: self.pointer_id,
            pointer_kind: self.kind,
            position: self.position,
            button: self.button,
            buttons: self.buttons,
            modifiers: self.modifiers,
            is_primary: self.is_primary,
            detail,
            wheel: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Remapper {
    capture: CaptureRegistry,
    hover: HoverTracker,
    clicks: ClickCounter,
    pressed: HashMap<u64, (ElementId, i16)>,
    // Pointers whose pointerdown was prevented; no mouse events until pointerup.
    compat_suppressed: HashSet<u64>,
}

impl Remapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture(&self) -> &CaptureRegistry {
        &self.capture
    }

    pub fn hover(&self) -> &HoverTracker {
        &self.hover
    }

    /// Forgets all per-pointer state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn handle<H: InputHost + ?Sized>(
        &mut self,
        host: &mut H,
        input: &RawInput,
        lens: &LensParams,
        now_ms: f64,
    ) -> Handled {
        match input {
            RawInput::Pointer(pointer) => self.handle_pointer(host, pointer, lens, now_ms),
            RawInput::Wheel(wheel) => self.handle_wheel(host, wheel, lens),
            RawInput::LostCapture { pointer_id } => {
                self.capture.clear(*pointer_id);
                Handled::default()
            }
        }
    }

    fn handle_pointer<H: InputHost + ?Sized>(
        &mut self,
        host: &mut H,
        input: &PointerInput,
        lens: &LensParams,
        now_ms: f64,
    ) -> Handled {
        let position = remap_position(input.position, host.surface_rect(), lens);
        let ctx = PointerContext::from_input(input, position);
        match input.phase {
            PointerPhase::Down => {
                let hit = hit_test(host, position);
                self.update_hover(host, &ctx, hit);
                let Some(target) = hit else {
                    return Handled::default();
                };
                self.dispatch_pointer(host, &ctx, SyntheticKind::PointerDown, target, None);
                self.pressed.insert(ctx.pointer_id, (target, ctx.button));
                consumed(target)
            }
            PointerPhase::Move => {
                let hit = hit_test(host, position);
                let target = self.captured(host, ctx.pointer_id).or(hit);
                self.update_hover(host, &ctx, target);
                let Some(target) = target else {
                    return Handled::default();
                };
                self.dispatch_pointer(host, &ctx, SyntheticKind::PointerMove, target, None);
                consumed(target)
            }
            PointerPhase::Up => {
                let hit = hit_test(host, position);
                let target = self.captured(host, ctx.pointer_id).or(hit);
                if let Some(target) = target {
                    self.dispatch_pointer(host, &ctx, SyntheticKind::PointerUp, target, None);
                }
                self.capture.clear(ctx.pointer_id);
                if ctx.kind == PointerKind::Touch {
                    self.update_hover(host, &ctx, None);
                } else {
                    self.update_hover(host, &ctx, hit);
                }
                let pressed = self.pressed.remove(&ctx.pointer_id);
                if let (Some((pressed_target, pressed_button)), Some(released)) = (pressed, target) {
                    if pressed_button == ctx.button {
                        self.synthesize_click(host, &ctx, pressed_target, released, now_ms);
                    }
                }
                match target {
                    Some(target) => consumed(target),
                    None => Handled::default(),
                }
            }
            PointerPhase::Cancel => {
                let target = self
                    .captured(host, ctx.pointer_id)
                    .or_else(|| self.hover.target(ctx.pointer_id));
                if let Some(target) = target {
                    let event = ctx.event(SyntheticKind::PointerCancel, target, None, 0);
                    host.dispatch(&event, &mut self.capture);
                }
                self.pressed.remove(&ctx.pointer_id);
                self.compat_suppressed.remove(&ctx.pointer_id);
                self.capture.clear(ctx.pointer_id);
                self.update_hover(host, &ctx, None);
                match target {
                    Some(target) => consumed(target),
                    None => Handled::default(),
                }
            }
            PointerPhase::Leave => {
                let had_hover = self.hover.target(ctx.pointer_id).is_some();
                if self.captured(host, ctx.pointer_id).is_none() {
                    self.update_hover(host, &ctx, None);
                }
                Handled {
                    stop_propagation: had_hover,
                    prevent_default: false,
                    target: None,
                }
            }
        }
    }

    fn handle_wheel<H: InputHost + ?Sized>(
        &mut self,
        host: &mut H,
        input: &WheelInput,
        lens: &LensParams,
    ) -> Handled {
        let position = remap_position(input.position, host.surface_rect(), lens);
        let Some(target) = hit_test(host, position) else {
            return Handled::default();
        };
        let event = SyntheticEvent {
            kind: SyntheticKind::Wheel,
            target,
            related_target: None,
            pointer_id: 0,
            pointer_kind: PointerKind::Mouse,
            position,
            button: -1,
            buttons: input.buttons,
            modifiers: input.modifiers,
            is_primary: true,
            detail: 0,
            wheel: Some(input.delta),
        };
        let outcome = host.dispatch(&event, &mut self.capture);
        Handled {
            stop_propagation: true,
            prevent_default: outcome.default_prevented,
            target: Some(target),
        }
    }

    /// Capture target for a pointer, dropping captures on detached elements.
    fn captured<H: InputHost + ?Sized>(&mut self, host: &H, pointer_id: u64) -> Option<ElementId> {
        let target = self.capture.target(pointer_id)?;
        if host.is_connected(target) {
            Some(target)
        } else {
            self.capture.clear(pointer_id);
            None
        }
    }

    /// Dispatches a pointer event plus its mouse compatibility event for
    /// mouse pointers. A prevented `pointerdown` suppresses the compatibility
    /// events of that pointer up to and including its `pointerup`.
    fn dispatch_pointer<H: InputHost + ?Sized>(
        &mut self,
        host: &mut H,
        ctx: &PointerContext,
        kind: SyntheticKind,
        target: ElementId,
        related: Option<ElementId>,
    ) -> DispatchOutcome {
        let outcome = host.dispatch(&ctx.event(kind, target, related, 0), &mut self.capture);
        if kind == SyntheticKind::PointerDown {
            if outcome.default_prevented {
                self.compat_suppressed.insert(ctx.pointer_id);
            } else {
                self.compat_suppressed.remove(&ctx.pointer_id);
            }
        }
        let suppressed = if kind == SyntheticKind::PointerUp {
            self.compat_suppressed.remove(&ctx.pointer_id)
        } else {
            self.compat_suppressed.contains(&ctx.pointer_id)
        };
        if ctx.kind == PointerKind::Mouse && !suppressed {
            if let Some(compat) = kind.mouse_compat() {
                host.dispatch(&ctx.event(compat, target, related, 0), &mut self.capture);
            }
        }
        outcome
    }

    fn update_hover<H: InputHost + ?Sized>(
        &mut self,
        host: &mut H,
        ctx: &PointerContext,
        next: Option<ElementId>,
    ) {
        let previous = self.hover.pointers.remove(&ctx.pointer_id).unwrap_or_default();
        if previous.target == next {
            self.hover.pointers.insert(ctx.pointer_id, previous);
            return;
        }
        let next_path = element_path(host, next);
        if let Some(old) = previous.target.filter(|id| host.is_connected(*id)) {
            self.dispatch_pointer(host, ctx, SyntheticKind::PointerOut, old, next);
        }
        for old in previous.path.iter().rev() {
            if !next_path.contains(old) && host.is_connected(*old) {
                self.dispatch_pointer(host, ctx, SyntheticKind::PointerLeave, *old, next);
            }
        }
        for new in next_path.iter() {
            if !previous.path.contains(new) {
                self.dispatch_pointer(host, ctx, SyntheticKind::PointerEnter, *new, previous.target);
            }
        }
        if let Some(new) = next {
            self.dispatch_pointer(host, ctx, SyntheticKind::PointerOver, new, previous.target);
        }
        if next.is_some() {
            self.hover.pointers.insert(
                ctx.pointer_id,
                HoverState {
                    target: next,
                    path: next_path,
                },
            );
        }
    }

    fn synthesize_click<H: InputHost + ?Sized>(
        &mut self,
        host: &mut H,
        ctx: &PointerContext,
        pressed: ElementId,
        released: ElementId,
        now_ms: f64,
    ) {
        let target = if pressed == released || contains(host, released, pressed) {
            released
        } else if contains(host, pressed, released) {
            pressed
        } else {
            return;
        };
        let kind = match ctx.button {
            0 => SyntheticKind::Click,
            1 => SyntheticKind::AuxClick,
            2 => SyntheticKind::ContextMenu,
            _ => return,
        };
        let detail = self.clicks.register(target, ctx.button, now_ms);
        host.dispatch(&ctx.event(kind, target, None, detail), &mut self.capture);
        if kind == SyntheticKind::Click && detail == 2 {
            host.dispatch(
                &ctx.event(SyntheticKind::DblClick, target, None, detail),
                &mut self.capture,
            );
        }
    }
}

fn consumed(target: ElementId) -> Handled {
    Handled {
        stop_propagation: true,
        prevent_default: true,
        target: Some(target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::LensCoefficients;

    const OVERLAY: ElementId = ElementId(999);
    const CONTAINER: ElementId = ElementId(1);
    const LINK_A: ElementId = ElementId(2);
    const LINK_B: ElementId = ElementId(3);

    struct MockHost {
        overlay_hit_testable: bool,
        elements: Vec<(ElementId, Option<ElementId>, Rect)>,
        log: Vec<(SyntheticKind, ElementId, u32)>,
        capture_on_down: Option<ElementId>,
        prevent_wheel: bool,
        prevent_pointer_down: bool,
    }

    impl MockHost {
        fn new() -> Self {
            Self {
                overlay_hit_testable: true,
                elements: vec![
                    (CONTAINER, None, Rect::new(0.0, 0.0, 200.0, 100.0)),
                    (LINK_A, Some(CONTAINER), Rect::new(10.0, 10.0, 40.0, 20.0)),
                    (LINK_B, Some(CONTAINER), Rect::new(100.0, 10.0, 40.0, 20.0)),
                ],
                log: Vec::new(),
                capture_on_down: None,
                prevent_wheel: false,
                prevent_pointer_down: false,
            }
        }

        fn pointer_log(&self) -> Vec<(&'static str, ElementId)> {
            self.log
                .iter()
                .filter(|(kind, _, _)| kind.name().starts_with("pointer"))
                .map(|(kind, id, _)| (kind.name(), *id))
                .collect()
        }

        fn names(&self) -> Vec<&'static str> {
            self.log.iter().map(|(kind, _, _)| kind.name()).collect()
        }
    }

    impl InputHost for MockHost {
        fn surface_rect(&self) -> Rect {
            Rect::new(0.0, 0.0, 200.0, 100.0)
        }

        fn overlay_hit_testable(&self) -> bool {
            self.overlay_hit_testable
        }

        fn set_overlay_hit_testable(&mut self, hit_testable: bool) {
            self.overlay_hit_testable = hit_testable;
        }

        fn element_at(&self, position: Vec2) -> Option<ElementId> {
            if self.overlay_hit_testable {
                return Some(OVERLAY);
            }
            self.elements
                .iter()
                .rev()
                .find(|(_, _, rect)| rect.contains(position))
                .map(|(id, _, _)| *id)
        }

        fn parent(&self, element: ElementId) -> Option<ElementId> {
            self.elements
                .iter()
                .find(|(id, _, _)| *id == element)
                .and_then(|(_, parent, _)| *parent)
        }

        fn is_connected(&self, element: ElementId) -> bool {
            self.elements.iter().any(|(id, _, _)| *id == element)
        }

        fn dispatch(&mut self, event: &SyntheticEvent, capture: &mut CaptureRegistry) -> DispatchOutcome {
            self.log.push((event.kind, event.target, event.detail));
            if event.kind == SyntheticKind::PointerDown && self.capture_on_down == Some(event.target) {
                capture.set(event.pointer_id, event.target);
            }
            DispatchOutcome {
                default_prevented: (event.kind == SyntheticKind::Wheel && self.prevent_wheel)
                    || (event.kind == SyntheticKind::PointerDown && self.prevent_pointer_down),
            }
        }
    }

    fn pointer(phase: PointerPhase, x: f32, y: f32) -> RawInput {
        RawInput::Pointer(PointerInput::new(phase, 1, PointerKind::Pen, Vec2::new(x, y)))
    }

    fn mouse(phase: PointerPhase, x: f32, y: f32, button: i16) -> RawInput {
        RawInput::Pointer(PointerInput::new(phase, 1, PointerKind::Mouse, Vec2::new(x, y)).with_button(button))
    }

    #[test]
    fn identity_lens_targets_direct_hit() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        for &(x, y) in &[(20.0, 15.0), (110.0, 25.0), (70.0, 70.0)] {
            let raw = Vec2::new(x, y);
            assert_eq!(remap_position(raw, host.surface_rect(), &lens), raw);
            let expected = hit_test(&mut host, raw);
            let handled = remapper.handle(&mut host, &pointer(PointerPhase::Down, x, y), &lens, 0.0);
            assert_eq!(handled.target, expected);
            remapper.handle(&mut host, &pointer(PointerPhase::Up, x, y), &lens, 0.0);
        }
    }

    #[test]
    fn hit_test_restores_overlay_state() {
        let mut host = MockHost::new();
        assert_eq!(hit_test(&mut host, Vec2::new(20.0, 15.0)), Some(LINK_A));
        assert!(host.overlay_hit_testable);
        host.overlay_hit_testable = false;
        hit_test(&mut host, Vec2::new(20.0, 15.0));
        assert!(!host.overlay_hit_testable);
    }

    #[test]
    fn hover_path_transitions_in_order() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &pointer(PointerPhase::Move, 20.0, 15.0), &lens, 0.0);
        assert_eq!(
            host.pointer_log(),
            vec![
                ("pointerenter", CONTAINER),
                ("pointerenter", LINK_A),
                ("pointerover", LINK_A),
                ("pointermove", LINK_A),
            ]
        );
        host.log.clear();
        remapper.handle(&mut host, &pointer(PointerPhase::Move, 110.0, 15.0), &lens, 10.0);
        assert_eq!(
            host.pointer_log(),
            vec![
                ("pointerout", LINK_A),
                ("pointerleave", LINK_A),
                ("pointerenter", LINK_B),
                ("pointerover", LINK_B),
                ("pointermove", LINK_B),
            ]
        );
        assert_eq!(remapper.hover().path(1), &[CONTAINER, LINK_B]);
        host.log.clear();
        remapper.handle(&mut host, &pointer(PointerPhase::Leave, 300.0, 15.0), &lens, 20.0);
        assert_eq!(
            host.pointer_log(),
            vec![
                ("pointerout", LINK_B),
                ("pointerleave", LINK_B),
                ("pointerleave", CONTAINER),
            ]
        );
        assert_eq!(remapper.hover().target(1), None);
    }

    #[test]
    fn mouse_pointers_get_compatibility_events() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &mouse(PointerPhase::Down, 20.0, 15.0, 0), &lens, 0.0);
        let names = host.names();
        let down = names.iter().position(|n| *n == "pointerdown");
        let mouse_down = names.iter().position(|n| *n == "mousedown");
        assert!(down.is_some() && mouse_down.is_some());
        assert!(down < mouse_down);
        assert!(names.contains(&"mouseenter"));
    }

    #[test]
    fn prevented_pointerdown_silences_mouse_events_until_pointerup() {
        let mut host = MockHost::new();
        host.overlay_hit_testable = false;
        host.prevent_pointer_down = true;
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &mouse(PointerPhase::Down, 20.0, 15.0, 0), &lens, 0.0);
        remapper.handle(&mut host, &mouse(PointerPhase::Move, 22.0, 15.0, 0), &lens, 5.0);
        remapper.handle(&mut host, &mouse(PointerPhase::Up, 22.0, 15.0, 0), &lens, 10.0);
        let names = host.names();
        assert!(names.contains(&"pointerdown"));
        assert!(names.contains(&"pointermove"));
        assert!(names.contains(&"pointerup"));
        for compat in ["mousedown", "mousemove", "mouseup"] {
            assert!(!names.contains(&compat), "{compat} should be suppressed");
        }

        host.log.clear();
        host.prevent_pointer_down = false;
        remapper.handle(&mut host, &mouse(PointerPhase::Down, 20.0, 15.0, 0), &lens, 1000.0);
        remapper.handle(&mut host, &mouse(PointerPhase::Move, 22.0, 15.0, 0), &lens, 1005.0);
        remapper.handle(&mut host, &mouse(PointerPhase::Up, 22.0, 15.0, 0), &lens, 1010.0);
        let names = host.names();
        for compat in ["mousedown", "mousemove", "mouseup"] {
            assert!(names.contains(&compat), "{compat} should be sent");
        }
    }

    #[test]
    fn capture_keeps_routing_to_captor() {
        let mut host = MockHost::new();
        host.capture_on_down = Some(LINK_A);
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &pointer(PointerPhase::Down, 20.0, 15.0), &lens, 0.0);
        assert!(remapper.capture().has(1, LINK_A));
        let handled = remapper.handle(&mut host, &pointer(PointerPhase::Move, 110.0, 15.0), &lens, 5.0);
        assert_eq!(handled.target, Some(LINK_A));
        let handled = remapper.handle(&mut host, &pointer(PointerPhase::Up, 110.0, 15.0), &lens, 10.0);
        assert_eq!(handled.target, Some(LINK_A));
        assert!(remapper.capture().is_empty());
        let handled = remapper.handle(&mut host, &pointer(PointerPhase::Move, 110.0, 15.0), &lens, 15.0);
        assert_eq!(handled.target, Some(LINK_B));
    }

    #[test]
    fn lost_capture_drops_registry_entry() {
        let mut host = MockHost::new();
        host.capture_on_down = Some(LINK_A);
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &pointer(PointerPhase::Down, 20.0, 15.0), &lens, 0.0);
        remapper.handle(&mut host, &RawInput::LostCapture { pointer_id: 1 }, &lens, 1.0);
        let handled = remapper.handle(&mut host, &pointer(PointerPhase::Move, 110.0, 15.0), &lens, 5.0);
        assert_eq!(handled.target, Some(LINK_B));
    }

    #[test]
    fn repeated_clicks_count_detail() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        for t in [0.0, 200.0, 900.0] {
            remapper.handle(&mut host, &pointer(PointerPhase::Down, 20.0, 15.0), &lens, t);
            remapper.handle(&mut host, &pointer(PointerPhase::Up, 20.0, 15.0), &lens, t + 50.0);
        }
        let clicks: Vec<_> = host
            .log
            .iter()
            .filter(|(kind, _, _)| matches!(kind, SyntheticKind::Click | SyntheticKind::DblClick))
            .map(|(kind, id, detail)| (kind.name(), *id, *detail))
            .collect();
        assert_eq!(
            clicks,
            vec![
                ("click", LINK_A, 1),
                ("click", LINK_A, 2),
                ("dblclick", LINK_A, 2),
                ("click", LINK_A, 1),
            ]
        );
    }

    #[test]
    fn release_on_ancestor_clicks_ancestor() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &pointer(PointerPhase::Down, 20.0, 15.0), &lens, 0.0);
        remapper.handle(&mut host, &pointer(PointerPhase::Up, 70.0, 70.0), &lens, 10.0);
        assert!(host.log.contains(&(SyntheticKind::Click, CONTAINER, 1)));
        host.log.clear();
        remapper.handle(&mut host, &pointer(PointerPhase::Down, 20.0, 15.0), &lens, 2000.0);
        remapper.handle(&mut host, &pointer(PointerPhase::Up, 110.0, 15.0), &lens, 2010.0);
        assert!(!host.names().contains(&"click"));
    }

    #[test]
    fn secondary_buttons_synthesize_aux_and_context_menu() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &mouse(PointerPhase::Down, 20.0, 15.0, 1), &lens, 0.0);
        remapper.handle(&mut host, &mouse(PointerPhase::Up, 20.0, 15.0, 1), &lens, 10.0);
        remapper.handle(&mut host, &mouse(PointerPhase::Down, 20.0, 15.0, 2), &lens, 20.0);
        remapper.handle(&mut host, &mouse(PointerPhase::Up, 20.0, 15.0, 2), &lens, 30.0);
        let names = host.names();
        assert!(names.contains(&"auxclick"));
        assert!(names.contains(&"contextmenu"));
        assert!(!names.contains(&"click"));
    }

    #[test]
    fn cancel_clears_press_and_hover() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams::default();
        remapper.handle(&mut host, &pointer(PointerPhase::Down, 20.0, 15.0), &lens, 0.0);
        remapper.handle(&mut host, &pointer(PointerPhase::Cancel, 20.0, 15.0), &lens, 5.0);
        assert!(host.log.contains(&(SyntheticKind::PointerCancel, LINK_A, 0)));
        assert!(!SyntheticKind::PointerCancel.cancelable());
        assert_eq!(remapper.hover().target(1), None);
        host.log.clear();
        remapper.handle(&mut host, &pointer(PointerPhase::Up, 20.0, 15.0), &lens, 10.0);
        assert!(!host.names().contains(&"click"));
    }

    #[test]
    fn wheel_reports_prevented_default() {
        let mut host = MockHost::new();
        host.prevent_wheel = true;
        let mut remapper = Remapper::new();
        let wheel = RawInput::Wheel(WheelInput {
            position: Vec2::new(110.0, 15.0),
            delta: WheelDelta {
                x: 0.0,
                y: 3.0,
                z: 0.0,
                mode: DeltaMode::Line,
            },
            buttons: 0,
            modifiers: Modifiers::default(),
        });
        let handled = remapper.handle(&mut host, &wheel, &LensParams::default(), 0.0);
        assert_eq!(handled.target, Some(LINK_B));
        assert!(handled.prevent_default);
        assert!(handled.stop_propagation);
    }

    #[test]
    fn warped_input_hits_the_content_under_the_pixel() {
        let mut host = MockHost::new();
        let mut remapper = Remapper::new();
        let lens = LensParams {
            coefficients: LensCoefficients::new(-0.02, 0.0),
            aspect: 2.0,
            ..LensParams::default()
        };
        let raw = Vec2::new(12.0, 12.0);
        let mapped = remap_position(raw, host.surface_rect(), &lens);
        assert_ne!(mapped, raw);
        let uv = lens.undistort(Vec2::new(12.0 / 200.0, 12.0 / 100.0));
        assert!((mapped.x - uv.x * 200.0).abs() < 1e-3);
        assert!((mapped.y - uv.y * 100.0).abs() < 1e-3);
        let expected = hit_test(&mut host, mapped);
        let handled = remapper.handle(&mut host, &pointer(PointerPhase::Down, 12.0, 12.0), &lens, 0.0);
        assert_eq!(handled.target, expected);
    }
}
