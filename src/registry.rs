// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Name based dispatch of untyped property access to typed accessors.

use crate::types::{Error, Result, Value, ValueType};
use log::*;
use std::collections::BTreeMap;

pub type Getter<C> = fn(&C, i32) -> Result<Value>;
pub type Setter<C> = fn(&mut C, i32, &Value) -> Result<()>;

/// Setter for properties that cannot be written.
pub fn read_only<C>(_: &mut C, _: i32, _: &Value) -> Result<()> {
    Err(Error::ReadOnly)
}

pub struct Property<C> {
    value_type: ValueType,
    writable: bool,
    getter: Getter<C>,
    setter: Setter<C>,
}

impl<C> Property<C> {
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

/// A set of named properties operating on a context `C`.
///
/// Properties are registered once and never removed. Registering a name
/// twice keeps the first registration.
pub struct Registry<C> {
    properties: BTreeMap<String, Property<C>>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Registry {
            properties: BTreeMap::new(),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, leaving the existing entry in place, if `name` is
    /// already registered.
    pub fn register(
        &mut self,
        name: &str,
        value_type: ValueType,
        getter: Getter<C>,
        setter: Setter<C>,
    ) -> bool {
        self.insert(name, value_type, true, getter, setter)
    }

    pub fn register_read_only(&mut self, name: &str, value_type: ValueType, getter: Getter<C>) -> bool {
        self.insert(name, value_type, false, getter, read_only::<C>)
    }

    fn insert(
        &mut self,
        name: &str,
        value_type: ValueType,
        writable: bool,
        getter: Getter<C>,
        setter: Setter<C>,
    ) -> bool {
        if self.properties.contains_key(name) {
            warn!("Registry: {} is already registered", name);
            return false;
        }
        self.properties.insert(
            name.to_owned(),
            Property {
                value_type,
                writable,
                getter,
                setter,
            },
        );
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn value_type(&self, name: &str) -> Option<ValueType> {
        self.properties.get(name).map(Property::value_type)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<&Property<C>> {
        self.properties.get(name).ok_or(Error::ParameterNotFound)
    }

    pub fn get(&self, ctx: &C, name: &str, index: i32) -> Result<Value> {
        let prop = self.lookup(name)?;
        let value = (prop.getter)(ctx, index)?;
        debug_assert_eq!(value.value_type(), prop.value_type, "getter of {}", name);
        Ok(value)
    }

    /// Number of elements [`Registry::get`] would currently produce.
    pub fn size(&self, ctx: &C, name: &str, index: i32) -> Result<usize> {
        self.get(ctx, name, index).map(|v| v.size())
    }

    /// Read-only properties refuse any value with `ReadOnly`; values of
    /// the wrong type are refused with `NotApplicable` before the setter
    /// runs.
    pub fn set(&self, ctx: &mut C, name: &str, index: i32, value: &Value) -> Result<()> {
        let prop = self.lookup(name)?;
        if !prop.writable {
            return Err(Error::ReadOnly);
        }
        if value.value_type() != prop.value_type {
            return Err(Error::NotApplicable);
        }
        (prop.setter)(ctx, index, value)
    }
}

#[cfg(test)]
struct Analyser {
    pass_energy: f64,
    lens_modes: Vec<String>,
}

#[cfg(test)]
fn test_registry() -> Registry<Analyser> {
    fn get_pass_energy(a: &Analyser, _: i32) -> Result<Value> {
        Ok(Value::Double(a.pass_energy))
    }
    fn set_pass_energy(a: &mut Analyser, _: i32, v: &Value) -> Result<()> {
        let e = v.as_f64()?;
        if e <= 0.0 {
            return Err(Error::IncorrectPassEnergy);
        }
        a.pass_energy = e;
        Ok(())
    }
    fn get_lens_mode(a: &Analyser, index: i32) -> Result<Value> {
        let index = if index == -1 { 0 } else { index };
        a.lens_modes
            .get(index as usize)
            .filter(|_| index >= 0)
            .map(|m| Value::String(m.clone()))
            .ok_or(Error::Index)
    }

    let mut reg = Registry::new();
    reg.register("pass_energy", ValueType::Double, get_pass_energy, set_pass_energy);
    reg.register_read_only("lens_mode", ValueType::String, get_lens_mode);
    reg
}

#[test]
fn test_pass_energy_property() {
    let reg = test_registry();
    let mut a = Analyser {
        pass_energy: 10.0,
        lens_modes: vec!["Transmission".into()],
    };
    assert_eq!(reg.get(&a, "pass_energy", -1), Ok(Value::Double(10.0)));
    reg.set(&mut a, "pass_energy", -1, &Value::Double(5.0)).expect("positive energy");
    assert_eq!(reg.get(&a, "pass_energy", -1), Ok(Value::Double(5.0)));
    assert_eq!(
        reg.set(&mut a, "pass_energy", -1, &Value::Double(-5.0)),
        Err(Error::IncorrectPassEnergy)
    );
    assert_eq!(
        reg.set(&mut a, "pass_energy", -1, &Value::Int32(5)),
        Err(Error::NotApplicable)
    );
    assert_eq!(a.pass_energy, 5.0);
}

#[test]
fn test_registry_errors() {
    let mut reg = test_registry();
    let mut a = Analyser {
        pass_energy: 10.0,
        lens_modes: vec!["Transmission".into(), "Angular30".into()],
    };
    assert_eq!(reg.get(&a, "no_such_thing", -1), Err(Error::ParameterNotFound));
    assert_eq!(
        reg.set(&mut a, "no_such_thing", -1, &Value::Bool(true)),
        Err(Error::ParameterNotFound)
    );
    assert_eq!(
        reg.set(&mut a, "lens_mode", -1, &Value::String("Angular30".into())),
        Err(Error::ReadOnly)
    );
    assert_eq!(reg.size(&a, "lens_mode", 1), Ok(9));
    assert_eq!(reg.get(&a, "lens_mode", 2), Err(Error::Index));
    assert_eq!(reg.get(&a, "lens_mode", -3), Err(Error::Index));

    fn other(_: &Analyser, _: i32) -> Result<Value> {
        Ok(Value::Double(1.0))
    }
    assert!(!reg.register("pass_energy", ValueType::Double, other, read_only));
    assert_eq!(reg.get(&a, "pass_energy", -1), Ok(Value::Double(10.0)));
    assert_eq!(reg.len(), 2);
    assert_eq!(reg.value_type("lens_mode"), Some(ValueType::String));
    assert_eq!(reg.names().collect::<Vec<_>>(), vec!["lens_mode", "pass_energy"]);
}
