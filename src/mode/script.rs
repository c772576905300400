//! Rhai-backed script host. Modes are rhai scripts defining
//! `draw(screen, etc)` and optionally `setup(screen, etc)`; the drawing
//! surface and the control-state snapshot are passed in explicitly — no
//! ambient globals. Persistent per-mode state lives in the `this` map
//! bound to every invocation.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::{
    AST, Array, CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Scope,
};

use super::{ModeInstance, ModeLoadError, ModeRuntimeError, ScriptHost};
use crate::control::{ControlState, ModeWriteback, color_picker, color_picker_fg};
use crate::surface::{Rgba, Surface};

/// Shared handle to the drawing surface, cloneable into script space.
#[derive(Clone)]
pub struct ScreenHandle(pub Rc<RefCell<Surface>>);

impl ScreenHandle {
    pub fn new(surface: Surface) -> Self {
        Self(Rc::new(RefCell::new(surface)))
    }
}

/// Per-invocation control-state snapshot handed to scripts. The handful of
/// mode-owned fields (`auto_clear`, colors) are writable; everything else
/// is read-only.
#[derive(Clone)]
pub struct StateHandle(pub Rc<RefCell<ControlState>>);

impl StateHandle {
    pub fn new(state: ControlState) -> Self {
        Self(Rc::new(RefCell::new(state)))
    }

    pub fn writeback(&self) -> ModeWriteback {
        let state = self.0.borrow();
        ModeWriteback {
            auto_clear: state.auto_clear,
            bg_color: state.bg_color,
            fg_color: state.fg_color,
        }
    }
}

pub struct RhaiHost {
    engine: Rc<Engine>,
}

impl Default for RhaiHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiHost {
    pub fn new() -> Self {
        Self {
            engine: Rc::new(build_engine()),
        }
    }
}

impl ScriptHost for RhaiHost {
    fn load(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Box<dyn ModeInstance>, ModeLoadError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ModeLoadError::Compile(e.to_string()))?;

        if !defines_hook(&ast, "draw") {
            return Err(ModeLoadError::MissingDraw);
        }

        let mut scope = Scope::new();
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| ModeLoadError::Compile(e.to_string()))?;

        Ok(Box::new(RhaiMode {
            name: name.to_string(),
            engine: Rc::clone(&self.engine),
            ast,
            scope,
            memory: Dynamic::from_map(Map::new()),
        }))
    }
}

struct RhaiMode {
    name: String,
    engine: Rc<Engine>,
    ast: AST,
    scope: Scope<'static>,
    memory: Dynamic,
}

impl RhaiMode {
    fn call_hook(
        &mut self,
        hook: &'static str,
        screen: &ScreenHandle,
        state: &StateHandle,
    ) -> Result<(), ModeRuntimeError> {
        let options = CallFnOptions::new()
            .eval_ast(false)
            .bind_this_ptr(&mut self.memory);

        self.engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut self.scope,
                &self.ast,
                hook,
                (screen.clone(), state.clone()),
            )
            .map(|_| ())
            .map_err(|e| ModeRuntimeError {
                hook,
                message: e.to_string(),
            })
    }
}

impl ModeInstance for RhaiMode {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(
        &mut self,
        screen: &ScreenHandle,
        state: &StateHandle,
    ) -> Result<(), ModeRuntimeError> {
        if !defines_hook(&self.ast, "setup") {
            return Ok(());
        }
        self.call_hook("setup", screen, state)
    }

    fn draw(
        &mut self,
        screen: &ScreenHandle,
        state: &StateHandle,
    ) -> Result<(), ModeRuntimeError> {
        self.call_hook("draw", screen, state)
    }
}

fn defines_hook(ast: &AST, name: &str) -> bool {
    ast.iter_functions()
        .any(|f| f.name == name && f.params.len() == 2)
}

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn script_error(message: impl Into<String>) -> Box<EvalAltResult> {
    message.into().into()
}

fn as_f32(value: &Dynamic) -> ScriptResult<f32> {
    if let Ok(i) = value.as_int() {
        return Ok(i as f32);
    }
    value
        .as_float()
        .map_err(|t| script_error(format!("expected a number, got {t}")))
}

fn as_i32(value: &Dynamic) -> ScriptResult<i32> {
    Ok(as_f32(value)?.round() as i32)
}

fn as_point(value: &Dynamic) -> ScriptResult<(i32, i32)> {
    let array = value
        .read_lock::<Array>()
        .ok_or_else(|| script_error("expected a point [x, y]"))?;
    if array.len() != 2 {
        return Err(script_error("a point needs exactly [x, y]"));
    }
    Ok((as_i32(&array[0])?, as_i32(&array[1])?))
}

fn as_points(array: &Array) -> ScriptResult<Vec<(i32, i32)>> {
    array.iter().map(as_point).collect()
}

fn as_rect(value: &Dynamic) -> ScriptResult<(i32, i32, i32, i32)> {
    let array = value
        .read_lock::<Array>()
        .ok_or_else(|| script_error("expected a rect [x, y, w, h]"))?;
    if array.len() != 4 {
        return Err(script_error("a rect needs exactly [x, y, w, h]"));
    }
    Ok((
        as_i32(&array[0])?,
        as_i32(&array[1])?,
        as_i32(&array[2])?,
        as_i32(&array[3])?,
    ))
}

fn as_color(value: &Dynamic) -> ScriptResult<Rgba> {
    let array = value
        .read_lock::<Array>()
        .ok_or_else(|| script_error("expected a color [r, g, b] or [r, g, b, a]"))?;
    if array.len() != 3 && array.len() != 4 {
        return Err(script_error("a color needs 3 or 4 components"));
    }
    let channel = |v: &Dynamic| -> ScriptResult<u8> {
        Ok(as_f32(v)?.clamp(0.0, 255.0) as u8)
    };
    let r = channel(&array[0])?;
    let g = channel(&array[1])?;
    let b = channel(&array[2])?;
    let a = if array.len() == 4 {
        channel(&array[3])?
    } else {
        255
    };
    Ok(Rgba::rgba(r, g, b, a))
}

fn as_width(value: &Dynamic) -> ScriptResult<u32> {
    Ok(as_i32(value)?.max(0) as u32)
}

fn rgb_array(color: [u8; 3]) -> Array {
    color.iter().map(|c| Dynamic::from_int(*c as i64)).collect()
}

fn samples_array(samples: &[f32]) -> Array {
    samples.iter().map(|s| Dynamic::from_float(*s)).collect()
}

/// One engine instance serves every mode: the drawing API and the state
/// accessors are registered once.
fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(128, 64);

    engine.register_type_with_name::<ScreenHandle>("Screen");
    engine.register_type_with_name::<StateHandle>("Etc");

    register_screen_api(&mut engine);
    register_state_api(&mut engine);

    engine
}

fn register_screen_api(engine: &mut Engine) {
    engine.register_get("width", |screen: &mut ScreenHandle| {
        screen.0.borrow().width() as i64
    });
    engine.register_get("height", |screen: &mut ScreenHandle| {
        screen.0.borrow().height() as i64
    });

    engine.register_fn(
        "fill",
        |screen: &mut ScreenHandle, color: Dynamic| -> ScriptResult<()> {
            screen.0.borrow_mut().fill(as_color(&color)?);
            Ok(())
        },
    );

    engine.register_fn(
        "circle",
        |screen: &mut ScreenHandle,
         pos: Dynamic,
         radius: Dynamic,
         color: Dynamic|
         -> ScriptResult<()> {
            let (x, y) = as_point(&pos)?;
            screen.0.borrow_mut().draw_circle(
                x,
                y,
                as_i32(&radius)?,
                as_color(&color)?,
                0,
            );
            Ok(())
        },
    );
    engine.register_fn(
        "circle",
        |screen: &mut ScreenHandle,
         pos: Dynamic,
         radius: Dynamic,
         color: Dynamic,
         width: Dynamic|
         -> ScriptResult<()> {
            let (x, y) = as_point(&pos)?;
            screen.0.borrow_mut().draw_circle(
                x,
                y,
                as_i32(&radius)?,
                as_color(&color)?,
                as_width(&width)?,
            );
            Ok(())
        },
    );

    engine.register_fn(
        "rect",
        |screen: &mut ScreenHandle,
         rect: Dynamic,
         color: Dynamic|
         -> ScriptResult<()> {
            let (x, y, w, h) = as_rect(&rect)?;
            screen
                .0
                .borrow_mut()
                .draw_rect(x, y, w, h, as_color(&color)?, 0);
            Ok(())
        },
    );
    engine.register_fn(
        "rect",
        |screen: &mut ScreenHandle,
         rect: Dynamic,
         color: Dynamic,
         width: Dynamic|
         -> ScriptResult<()> {
            let (x, y, w, h) = as_rect(&rect)?;
            screen.0.borrow_mut().draw_rect(
                x,
                y,
                w,
                h,
                as_color(&color)?,
                as_width(&width)?,
            );
            Ok(())
        },
    );

    engine.register_fn(
        "line",
        |screen: &mut ScreenHandle,
         start: Dynamic,
         end: Dynamic,
         color: Dynamic|
         -> ScriptResult<()> {
            let (x0, y0) = as_point(&start)?;
            let (x1, y1) = as_point(&end)?;
            screen
                .0
                .borrow_mut()
                .draw_line(x0, y0, x1, y1, as_color(&color)?, 1);
            Ok(())
        },
    );
    engine.register_fn(
        "line",
        |screen: &mut ScreenHandle,
         start: Dynamic,
         end: Dynamic,
         color: Dynamic,
         width: Dynamic|
         -> ScriptResult<()> {
            let (x0, y0) = as_point(&start)?;
            let (x1, y1) = as_point(&end)?;
            screen.0.borrow_mut().draw_line(
                x0,
                y0,
                x1,
                y1,
                as_color(&color)?,
                as_width(&width)?.max(1),
            );
            Ok(())
        },
    );

    engine.register_fn(
        "lines",
        |screen: &mut ScreenHandle,
         points: Array,
         closed: bool,
         color: Dynamic,
         width: Dynamic|
         -> ScriptResult<()> {
            screen.0.borrow_mut().draw_lines(
                &as_points(&points)?,
                closed,
                as_color(&color)?,
                as_width(&width)?.max(1),
            );
            Ok(())
        },
    );

    engine.register_fn(
        "polygon",
        |screen: &mut ScreenHandle,
         points: Array,
         color: Dynamic|
         -> ScriptResult<()> {
            screen.0.borrow_mut().draw_polygon(
                &as_points(&points)?,
                as_color(&color)?,
                0,
            );
            Ok(())
        },
    );
    engine.register_fn(
        "polygon",
        |screen: &mut ScreenHandle,
         points: Array,
         color: Dynamic,
         width: Dynamic|
         -> ScriptResult<()> {
            screen.0.borrow_mut().draw_polygon(
                &as_points(&points)?,
                as_color(&color)?,
                as_width(&width)?,
            );
            Ok(())
        },
    );

    engine.register_fn(
        "ellipse",
        |screen: &mut ScreenHandle,
         rect: Dynamic,
         color: Dynamic|
         -> ScriptResult<()> {
            let (x, y, w, h) = as_rect(&rect)?;
            screen
                .0
                .borrow_mut()
                .draw_ellipse(x, y, w, h, as_color(&color)?, 0);
            Ok(())
        },
    );
    engine.register_fn(
        "ellipse",
        |screen: &mut ScreenHandle,
         rect: Dynamic,
         color: Dynamic,
         width: Dynamic|
         -> ScriptResult<()> {
            let (x, y, w, h) = as_rect(&rect)?;
            screen.0.borrow_mut().draw_ellipse(
                x,
                y,
                w,
                h,
                as_color(&color)?,
                as_width(&width)?,
            );
            Ok(())
        },
    );

    engine.register_fn(
        "arc",
        |screen: &mut ScreenHandle,
         rect: Dynamic,
         start: Dynamic,
         stop: Dynamic,
         color: Dynamic,
         width: Dynamic|
         -> ScriptResult<()> {
            let (x, y, w, h) = as_rect(&rect)?;
            screen.0.borrow_mut().draw_arc(
                x,
                y,
                w,
                h,
                as_f32(&start)?,
                as_f32(&stop)?,
                as_color(&color)?,
                as_width(&width)?.max(1),
            );
            Ok(())
        },
    );

    engine.register_fn(
        "blit",
        |screen: &mut ScreenHandle,
         src: ScreenHandle,
         pos: Dynamic|
         -> ScriptResult<()> {
            let (x, y) = as_point(&pos)?;
            let src_surface = src.0.borrow().clone();
            screen.0.borrow_mut().blit(&src_surface, x, y);
            Ok(())
        },
    );

    engine.register_fn(
        "text",
        |screen: &mut ScreenHandle,
         pos: Dynamic,
         message: &str,
         color: Dynamic|
         -> ScriptResult<()> {
            let (x, y) = as_point(&pos)?;
            screen
                .0
                .borrow_mut()
                .draw_text(x, y, message, as_color(&color)?, 1);
            Ok(())
        },
    );
    engine.register_fn(
        "text",
        |screen: &mut ScreenHandle,
         pos: Dynamic,
         message: &str,
         color: Dynamic,
         scale: Dynamic|
         -> ScriptResult<()> {
            let (x, y) = as_point(&pos)?;
            screen.0.borrow_mut().draw_text(
                x,
                y,
                message,
                as_color(&color)?,
                as_width(&scale)?.max(1),
            );
            Ok(())
        },
    );

    // Offscreen surface for compositing, transparent like SRCALPHA.
    engine.register_fn("new_surface", |w: i64, h: i64| {
        ScreenHandle::new(Surface::new_alpha(
            w.clamp(1, 4096) as u32,
            h.clamp(1, 4096) as u32,
        ))
    });
}

fn register_state_api(engine: &mut Engine) {
    macro_rules! knob_getter {
        ($name:literal, $index:expr) => {
            engine.register_get($name, |state: &mut StateHandle| {
                state.0.borrow().knobs[$index]
            });
        };
    }
    knob_getter!("knob1", 0);
    knob_getter!("knob2", 1);
    knob_getter!("knob3", 2);
    knob_getter!("knob4", 3);
    knob_getter!("knob5", 4);

    engine.register_get("audio_in", |state: &mut StateHandle| {
        samples_array(&state.0.borrow().audio_in)
    });
    engine.register_get("audio_left", |state: &mut StateHandle| {
        samples_array(&state.0.borrow().audio_left)
    });
    engine.register_get("audio_right", |state: &mut StateHandle| {
        samples_array(&state.0.borrow().audio_right)
    });
    engine.register_get("audio_peak", |state: &mut StateHandle| {
        state.0.borrow().audio_peak
    });
    engine.register_get("audio_peak_r", |state: &mut StateHandle| {
        state.0.borrow().audio_peak_r
    });
    engine.register_get("audio_trig", |state: &mut StateHandle| {
        state.0.borrow().audio_trig
    });
    engine.register_get("trig", |state: &mut StateHandle| {
        state.0.borrow().audio_trig
    });

    engine.register_get("midi_note", |state: &mut StateHandle| {
        state.0.borrow().midi_note
    });
    engine.register_get("midi_velocity", |state: &mut StateHandle| {
        state.0.borrow().midi_velocity
    });
    engine.register_get("midi_note_new", |state: &mut StateHandle| {
        state.0.borrow().midi_note_new
    });
    engine.register_get("midi_notes", |state: &mut StateHandle| {
        state
            .0
            .borrow()
            .midi_notes
            .iter()
            .map(|n| Dynamic::from_int(*n))
            .collect::<Array>()
    });

    engine.register_get("bg_color", |state: &mut StateHandle| {
        rgb_array(state.0.borrow().bg_color)
    });
    engine.register_set(
        "bg_color",
        |state: &mut StateHandle, color: Dynamic| -> ScriptResult<()> {
            let c = as_color(&color)?;
            state.0.borrow_mut().bg_color = [c.r, c.g, c.b];
            Ok(())
        },
    );
    engine.register_get("fg_color", |state: &mut StateHandle| {
        rgb_array(state.0.borrow().fg_color)
    });
    engine.register_set(
        "fg_color",
        |state: &mut StateHandle, color: Dynamic| -> ScriptResult<()> {
            let c = as_color(&color)?;
            state.0.borrow_mut().fg_color = [c.r, c.g, c.b];
            Ok(())
        },
    );

    engine.register_get("auto_clear", |state: &mut StateHandle| {
        state.0.borrow().auto_clear
    });
    engine.register_set(
        "auto_clear",
        |state: &mut StateHandle, value: bool| {
            state.0.borrow_mut().auto_clear = value;
        },
    );

    engine.register_get("mode", |state: &mut StateHandle| {
        state.0.borrow().mode_name.clone()
    });
    engine.register_get("frame_count", |state: &mut StateHandle| {
        state.0.borrow().frame_count as i64
    });
    engine.register_get("fps", |state: &mut StateHandle| {
        state.0.borrow().fps
    });
    engine.register_get("xres", |state: &mut StateHandle| {
        state.0.borrow().width as i64
    });
    engine.register_get("yres", |state: &mut StateHandle| {
        state.0.borrow().height as i64
    });

    engine.register_fn(
        "color_picker",
        |_state: &mut StateHandle, value: Dynamic| -> ScriptResult<Array> {
            Ok(rgb_array(color_picker(as_f32(&value)?)))
        },
    );
    engine.register_fn(
        "color_picker_bg",
        |_state: &mut StateHandle, value: Dynamic| -> ScriptResult<Array> {
            Ok(rgb_array(color_picker(as_f32(&value)?)))
        },
    );
    engine.register_fn(
        "color_picker_fg",
        |_state: &mut StateHandle, value: Dynamic| -> ScriptResult<Array> {
            Ok(rgb_array(color_picker_fg(as_f32(&value)?)))
        },
    );
}
