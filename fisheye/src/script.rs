use std::{cell::RefCell, path::Path, rc::Rc};

use mlua::{Function, IntoLuaMulti, Lua, MultiValue, RegistryKey, Table, Value};
use nalgebra_glm::{DVec2, DVec3};

use math::{latlon_to_ray, plate_uv_to_ray, ray_to_latlon, ViewBasis};

use crate::{Error, Result};

/// An opaque handle onto a script-defined function. The host owns the
/// underlying closure; the handle stays valid until the host is dropped.
pub struct ScriptFn(RegistryKey);

/// The orientation frame of a single plate as seen by scripts.
#[derive(Clone, Copy, Debug)]
pub struct PlateFrame {
    pub basis: ViewBasis,
    pub dist: f64,
}

/// The outcome of calling a scripted projection function for one sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample<T> {
    /// The script produced a value for the sample.
    Hit(T),
    /// The script returned nil: leave the sample unmapped.
    Skip,
}

/// The embedded interpreter hosting the lens and globe scripts.
///
/// Math shorthands and the three ray helpers are bound into the global
/// environment before any user script runs. Projection functions are
/// resolved once at load time and called through [`ScriptFn`] handles.
pub struct ScriptHost {
    lua: Lua,
    plate_frames: Rc<RefCell<Vec<PlateFrame>>>,
}

impl ScriptHost {
    /// Creates a new host with the math prelude and ray helpers bound.
    pub fn new() -> Result<Self> {
        let host = Self {
            lua: Lua::new(),
            plate_frames: Rc::new(RefCell::new(Vec::new())),
        };

        host.bind_prelude()?;
        host.bind_helpers()?;

        Ok(host)
    }

    fn bind_prelude(&self) -> Result<()> {
        let globals = self.lua.globals();

        globals.set("pi", std::f64::consts::PI)?;
        globals.set("tau", std::f64::consts::TAU)?;

        let unary: [(&str, fn(f64) -> f64); 14] = [
            ("sin", f64::sin),
            ("cos", f64::cos),
            ("tan", f64::tan),
            ("asin", f64::asin),
            ("acos", f64::acos),
            ("atan", f64::atan),
            ("sinh", f64::sinh),
            ("cosh", f64::cosh),
            ("tanh", f64::tanh),
            ("log", f64::ln),
            ("log10", f64::log10),
            ("abs", f64::abs),
            ("sqrt", f64::sqrt),
            ("exp", f64::exp),
        ];

        for (name, f) in unary {
            globals.set(name, self.lua.create_function(move |_, x: f64| Ok(f(x)))?)?;
        }

        globals.set(
            "atan2",
            self.lua
                .create_function(|_, (y, x): (f64, f64)| Ok(y.atan2(x)))?,
        )?;
        globals.set(
            "pow",
            self.lua
                .create_function(|_, (x, y): (f64, f64)| Ok(x.powf(y)))?,
        )?;

        Ok(())
    }

    fn bind_helpers(&self) -> Result<()> {
        let globals = self.lua.globals();

        globals.set(
            "latlon_to_ray",
            self.lua.create_function(|_, (lat, lon): (f64, f64)| {
                let ray = latlon_to_ray(lat, lon);
                Ok((ray.x, ray.y, ray.z))
            })?,
        )?;

        globals.set(
            "ray_to_latlon",
            self.lua.create_function(|_, (x, y, z): (f64, f64, f64)| {
                let (lat, lon) = ray_to_latlon(&DVec3::new(x, y, z));
                Ok((lat, lon))
            })?,
        )?;

        let frames = self.plate_frames.clone();
        globals.set(
            "plate_to_ray",
            self.lua
                .create_function(move |lua, (index, u, v): (i64, f64, f64)| {
                    let frames = frames.borrow();

                    match usize::try_from(index).ok().and_then(|i| frames.get(i)) {
                        Some(frame) => {
                            let ray = plate_uv_to_ray(&frame.basis, frame.dist, u, v);
                            (ray.x, ray.y, ray.z).into_lua_multi(lua)
                        }
                        None => Value::Nil.into_lua_multi(lua),
                    }
                })?,
        )?;

        Ok(())
    }

    /// Publishes the plate frames read by the `plate_to_ray` helper.
    pub fn set_plate_frames(&self, frames: Vec<PlateFrame>) {
        *self.plate_frames.borrow_mut() = frames;
    }

    /// Loads and executes the script at the given path.
    ///
    /// # Arguments
    /// * `path` - The file to load.
    pub fn load_file(&self, path: &Path) -> Result<()> {
        let code = std::fs::read_to_string(path)
            .map_err(|e| Error::IO(format!("{}: {}", path.display(), e)))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_owned());

        self.load_str(&name, &code)
    }

    /// Executes the given script source under the given chunk name.
    ///
    /// # Arguments
    /// * `name` - The chunk name used in error messages.
    /// * `code` - The script source.
    pub fn load_str(&self, name: &str, code: &str) -> Result<()> {
        self.lua.load(code).set_name(name).exec()?;

        Ok(())
    }

    /// Resolves a global function into a handle, or None if the global is
    /// not a function.
    pub fn get_function(&self, name: &str) -> Result<Option<ScriptFn>> {
        let value: Value = self.lua.globals().get(name)?;

        match value {
            Value::Function(f) => Ok(Some(ScriptFn(self.lua.create_registry_value(f)?))),
            _ => Ok(None),
        }
    }

    /// Reads a global number, or None if absent or not a number.
    pub fn get_number(&self, name: &str) -> Result<Option<f64>> {
        let value: Value = self.lua.globals().get(name)?;

        Ok(as_number(&value))
    }

    /// Reads a global string, or None if absent or not a string.
    pub fn get_string(&self, name: &str) -> Result<Option<String>> {
        let value: Value = self.lua.globals().get(name)?;

        match value {
            Value::String(s) => Ok(Some(s.to_str()?.to_owned())),
            _ => Ok(None),
        }
    }

    /// Sets a global number.
    pub fn set_number(&self, name: &str, value: f64) -> Result<()> {
        self.lua.globals().set(name, value)?;

        Ok(())
    }

    /// Removes a global.
    pub fn clear_global(&self, name: &str) -> Result<()> {
        self.lua.globals().set(name, Value::Nil)?;

        Ok(())
    }

    /// Calls a scripted inverse map with a lens-space position.
    /// Three numbers make a hit, a single nil skips the sample and anything
    /// else is a protocol error. The returned ray is not yet normalized.
    pub fn call_inverse(&self, f: &ScriptFn, x: f64, y: f64) -> Result<Sample<DVec3>> {
        let func: Function = self.lua.registry_value(&f.0)?;
        let values: MultiValue = func.call((x, y))?;
        let values = values.into_vec();

        match values.as_slice() {
            [Value::Nil] => Ok(Sample::Skip),
            [a, b, c] => match (as_number(a), as_number(b), as_number(c)) {
                (Some(x), Some(y), Some(z)) => Ok(Sample::Hit(DVec3::new(x, y, z))),
                _ => Err(Error::Script(
                    "inverse lens map returned non-numeric values".to_owned(),
                )),
            },
            _ => Err(Error::Script(format!(
                "inverse lens map returned {} values, expected 3 numbers or nil",
                values.len()
            ))),
        }
    }

    /// Calls a scripted forward map with a direction ray.
    /// Two numbers make a hit, a single nil skips the sample and anything
    /// else is a protocol error.
    pub fn call_forward(&self, f: &ScriptFn, ray: &DVec3) -> Result<Sample<DVec2>> {
        let func: Function = self.lua.registry_value(&f.0)?;
        let values: MultiValue = func.call((ray.x, ray.y, ray.z))?;
        let values = values.into_vec();

        match values.as_slice() {
            [Value::Nil] => Ok(Sample::Skip),
            [a, b] => match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => Ok(Sample::Hit(DVec2::new(x, y))),
                _ => Err(Error::Script(
                    "forward lens map returned non-numeric values".to_owned(),
                )),
            },
            _ => Err(Error::Script(format!(
                "forward lens map returned {} values, expected 2 numbers or nil",
                values.len()
            ))),
        }
    }

    /// Calls a scripted plate selector with a direction ray and returns its
    /// integer result, or -1 for a non-integer result.
    pub fn call_plate_select(&self, f: &ScriptFn, ray: &DVec3) -> Result<i32> {
        let func: Function = self.lua.registry_value(&f.0)?;
        let value: Value = func.call((ray.x, ray.y, ray.z))?;

        Ok(match value {
            Value::Integer(i) => i as i32,
            Value::Number(n) if n.fract() == 0.0 => n as i32,
            _ => -1,
        })
    }

    /// Reads the `plates` table of a globe script and validates its shape:
    /// a sequence of `{forward, up, fov_degrees}` entries.
    pub fn read_plates(&self) -> Result<Vec<PlateSpec>> {
        let value: Value = self.lua.globals().get("plates")?;

        let table = match value {
            Value::Table(t) => t,
            Value::Nil => {
                return Err(Error::Contract(
                    "globe script defines no plates table".to_owned(),
                ))
            }
            _ => return Err(Error::Contract("plates must be a table".to_owned())),
        };

        let len = table.raw_len();
        let mut specs = Vec::with_capacity(len);

        for i in 1..=len {
            let entry: Value = table.raw_get(i)?;
            let entry = match entry {
                Value::Table(t) => t,
                _ => {
                    return Err(Error::Contract(format!(
                        "plates[{}] must be a {{forward, up, fov}} table",
                        i
                    )))
                }
            };

            let forward = read_vec3(&entry, 1, i, "forward")?;
            let up = read_vec3(&entry, 2, i, "up")?;

            let fov: Value = entry.raw_get(3)?;
            let fov_deg = as_number(&fov).ok_or_else(|| {
                Error::Contract(format!("plates[{}] fov must be a number in degrees", i))
            })?;

            specs.push(PlateSpec {
                forward,
                up,
                fov_deg,
            });
        }

        Ok(specs)
    }
}

/// One entry of a globe script's `plates` table.
#[derive(Clone, Copy, Debug)]
pub struct PlateSpec {
    pub forward: DVec3,
    pub up: DVec3,
    pub fov_deg: f64,
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Number(n) => Some(*n),
        _ => None,
    }
}

fn read_vec3(entry: &Table, slot: usize, plate_no: usize, what: &str) -> Result<DVec3> {
    let value: Value = entry.raw_get(slot)?;

    let table = match value {
        Value::Table(t) => t,
        _ => {
            return Err(Error::Contract(format!(
                "plates[{}] {} must be a sequence of 3 numbers",
                plate_no, what
            )))
        }
    };

    if table.raw_len() != 3 {
        return Err(Error::Contract(format!(
            "plates[{}] {} must have exactly 3 components",
            plate_no, what
        )));
    }

    let mut components = [0f64; 3];
    for (k, c) in components.iter_mut().enumerate() {
        let v: Value = table.raw_get(k + 1)?;
        *c = as_number(&v).ok_or_else(|| {
            Error::Contract(format!(
                "plates[{}] {} component {} must be a number",
                plate_no,
                what,
                k + 1
            ))
        })?;
    }

    Ok(DVec3::new(components[0], components[1], components[2]))
}
