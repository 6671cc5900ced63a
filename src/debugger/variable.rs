//! Typed decoding of raw memory and lazy expansion of compound values.

use crate::debugger::error::Error;
use crate::debugger::utils::UniqueIds;
use crate::debugger::view::Variable;
use crate::vm::memory;
use crate::vm::types::{BasicType, GeneralType};
use std::collections::HashMap;

pub const INVALID_VALUE: &str = "<invalid>";
pub const UNKNOWN_VALUE: &str = "?";

/// Compound value that can be expanded by a client through its reference id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectVariable {
    pub id: i64,
    pub ty: GeneralType,
    pub address: i64,
    /// Name of the variable this value was reached from.
    pub parent: String,
}

/// Per stop registry of expandable values, keyed by address and type.
#[derive(Debug, Default)]
pub struct IndirectRegistry {
    entries: HashMap<i64, IndirectVariable>,
    by_address: HashMap<(i64, String), i64>,
}

impl IndirectRegistry {
    /// Return the reference id of a value, registering it if seen for the first time.
    pub fn register(&mut self, ids: &UniqueIds, ty: &GeneralType, address: i64, parent: &str) -> i64 {
        let key = (address, ty.to_string());
        if let Some(id) = self.by_address.get(&key) {
            return *id;
        }

        let id = ids.next();
        self.by_address.insert(key, id);
        self.entries.insert(
            id,
            IndirectVariable {
                id,
                ty: ty.clone(),
                address,
                parent: parent.to_string(),
            },
        );
        id
    }

    pub fn get(&self, id: i64) -> Option<&IndirectVariable> {
        self.entries.get(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_address.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Format a scalar stored at `address`.
pub fn render_scalar(memory: &[u8], address: i64, ty: BasicType) -> String {
    let Some(size) = ty.size() else {
        return match ty {
            BasicType::Void => "void",
            _ => "any",
        }
        .to_string();
    };
    let Some(raw) = memory::read_int(memory, address, size) else {
        return INVALID_VALUE.to_string();
    };

    match ty {
        BasicType::U8 => (raw as u8).to_string(),
        BasicType::U16 => (raw as u16).to_string(),
        BasicType::U32 => (raw as u32).to_string(),
        BasicType::U64 => (raw as u64).to_string(),
        BasicType::F32 => f32::from_bits(raw as u32).to_string(),
        _ => raw.to_string(),
    }
}

/// Decoder of values stored in a memory buffer.
pub struct VariableReader<'a> {
    memory: &'a [u8],
    pointer_size: usize,
    registry: &'a mut IndirectRegistry,
    ids: &'a UniqueIds,
}

impl<'a> VariableReader<'a> {
    pub fn new(
        memory: &'a [u8],
        pointer_size: usize,
        registry: &'a mut IndirectRegistry,
        ids: &'a UniqueIds,
    ) -> Self {
        Self {
            memory,
            pointer_size,
            registry,
            ids,
        }
    }

    pub fn entry(&self, id: i64) -> Option<&IndirectVariable> {
        self.registry.get(id)
    }

    fn in_memory(&self, address: i64) -> bool {
        address > 0 && (address as usize) < self.memory.len()
    }

    /// Decode a value of type `ty` placed at `address`.
    pub fn read(&mut self, name: &str, ty: &GeneralType, address: i64) -> Result<Variable, Error> {
        let mut var = Variable {
            name: name.to_string(),
            ty: ty.to_string(),
            ..Default::default()
        };
        let size = ty.size(self.pointer_size);
        if let Some(size) = size {
            if memory::checked_range(self.memory, address, size).is_some() {
                var.memory_reference = Some(address.to_string());
            }
        }

        match ty.final_value() {
            GeneralType::Builtin(basic) => {
                var.value = render_scalar(self.memory, address, *basic);
            }
            GeneralType::Pointer(to) => {
                match memory::read_pointer(self.memory, address, self.pointer_size) {
                    Some(target) => {
                        var.value = format!("0x{target:x}");
                        let expandable = !matches!(
                            to.final_value(),
                            GeneralType::Builtin(BasicType::Void | BasicType::Any)
                        );
                        if expandable && self.in_memory(target) {
                            var.variables_reference =
                                self.registry.register(self.ids, to, target, name);
                        }
                    }
                    None => var.value = INVALID_VALUE.to_string(),
                }
            }
            GeneralType::Function(_) => {
                var.value = match memory::read_pointer(self.memory, address, self.pointer_size) {
                    Some(target) => format!("0x{target:x}"),
                    None => INVALID_VALUE.to_string(),
                };
            }
            GeneralType::Array(array) => match (array.length, size) {
                (Some(length), Some(size)) => {
                    if memory::checked_range(self.memory, address, size).is_none() {
                        var.value = INVALID_VALUE.to_string();
                    } else {
                        var.value = "[...]".to_string();
                        var.indexed_variables = Some(length);
                        var.variables_reference =
                            self.registry.register(self.ids, ty, address, name);
                    }
                }
                _ => var.value = format!("[{UNKNOWN_VALUE}]"),
            },
            GeneralType::Struct(structure) => {
                if address < 0 || address as usize >= self.memory.len() {
                    var.value = INVALID_VALUE.to_string();
                } else {
                    var.value = "{...}".to_string();
                    var.named_variables = Some(structure.fields.len());
                    var.variables_reference =
                        self.registry.register(self.ids, ty, address, name);
                }
            }
            GeneralType::Generic(name) => {
                return Err(Error::UnresolvedType(name.clone()));
            }
            GeneralType::Alias(alias) => return self.read(name, &alias.value, address),
        }

        Ok(var)
    }

    /// Children of a registered value as (name, type, address) triples.
    pub fn children(&self, entry: &IndirectVariable) -> Vec<(String, GeneralType, i64)> {
        match entry.ty.final_value() {
            GeneralType::Array(array) => {
                let (Some(length), Some(stride)) =
                    (array.length, array.of.size(self.pointer_size))
                else {
                    return vec![];
                };
                (0..length)
                    .map(|i| {
                        (
                            format!("[{i}]"),
                            (*array.of).clone(),
                            entry.address + (i * stride) as i64,
                        )
                    })
                    .collect()
            }
            GeneralType::Struct(structure) => {
                let mut offset = 0;
                let mut fields = vec![];
                for field in &structure.fields {
                    let ty = field.ty.substitute(&structure.type_arguments);
                    let Some(size) = ty.size(self.pointer_size) else {
                        break;
                    };
                    fields.push((field.name.clone(), ty, entry.address + offset as i64));
                    offset += size;
                }
                fields
            }
            _ => vec![(format!("*{}", entry.parent), entry.ty.clone(), entry.address)],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::types::{ArrayType, Field, StructType};
    use std::collections::BTreeMap;

    fn i32_ty() -> GeneralType {
        GeneralType::Builtin(BasicType::I32)
    }

    fn memory() -> Vec<u8> {
        let mut memory = vec![0u8; 64];
        memory::write_bytes(&mut memory, 8, &(-5i32).to_le_bytes());
        memory::write_bytes(&mut memory, 12, &7i32.to_le_bytes());
        // pointer at 16 to 8
        memory::write_bytes(&mut memory, 16, &memory::pointer_bytes(8, 4));
        memory::write_bytes(&mut memory, 20, &1.5f32.to_le_bytes());
        memory
    }

    #[test]
    fn test_scalars_and_bounds() {
        let memory = memory();
        let ids = UniqueIds::default();
        let mut registry = IndirectRegistry::default();
        let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);

        let var = reader.read("x", &i32_ty(), 8).unwrap();
        assert_eq!(var.value, "-5");
        assert_eq!(var.memory_reference.as_deref(), Some("8"));

        let var = reader
            .read("f", &GeneralType::Builtin(BasicType::F32), 20)
            .unwrap();
        assert_eq!(var.value, "1.5");

        let var = reader
            .read("u", &GeneralType::Builtin(BasicType::U8), 8)
            .unwrap();
        assert_eq!(var.value, "251");

        assert_eq!(reader.read("y", &i32_ty(), 62).unwrap().value, INVALID_VALUE);
        assert_eq!(reader.read("y", &i32_ty(), -4).unwrap().value, INVALID_VALUE);
        assert_eq!(
            reader.read("v", &GeneralType::VOID, 0).unwrap().value,
            "void"
        );
    }

    #[test]
    fn test_pointer_registry() {
        let memory = memory();
        let ids = UniqueIds::default();
        let mut registry = IndirectRegistry::default();
        let ptr = GeneralType::Pointer(Box::new(i32_ty()));

        let (first, second) = {
            let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);
            let first = reader.read("p", &ptr, 16).unwrap();
            let second = reader.read("q", &ptr, 16).unwrap();
            (first, second)
        };
        assert_eq!(first.value, "0x8");
        assert_ne!(first.variables_reference, 0);
        assert_eq!(first.variables_reference, second.variables_reference);
        assert_eq!(registry.len(), 1);

        let entry = registry.get(first.variables_reference).unwrap().clone();
        let reader = VariableReader::new(&memory, 4, &mut registry, &ids);
        let children = reader.children(&entry);
        assert_eq!(children, vec![("*p".to_string(), i32_ty(), 8)]);

        registry.clear();
        let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);
        let again = reader.read("p", &ptr, 16).unwrap();
        assert_ne!(again.variables_reference, first.variables_reference);
    }

    #[test]
    fn test_null_pointer_is_not_expandable() {
        let memory = memory();
        let ids = UniqueIds::default();
        let mut registry = IndirectRegistry::default();
        let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);

        let var = reader
            .read("p", &GeneralType::Pointer(Box::new(i32_ty())), 40)
            .unwrap();
        assert_eq!(var.value, "0x0");
        assert_eq!(var.variables_reference, 0);
    }

    #[test]
    fn test_array() {
        let memory = memory();
        let ids = UniqueIds::default();
        let mut registry = IndirectRegistry::default();
        let ty = GeneralType::Array(ArrayType {
            of: Box::new(i32_ty()),
            length: Some(2),
        });

        let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);
        let var = reader.read("a", &ty, 8).unwrap();
        assert_eq!(var.value, "[...]");
        assert_eq!(var.indexed_variables, Some(2));
        assert_eq!(reader.read("b", &ty, 60).unwrap().value, INVALID_VALUE);

        let entry = registry.get(var.variables_reference).unwrap().clone();
        let reader = VariableReader::new(&memory, 4, &mut registry, &ids);
        let children = reader.children(&entry);
        assert_eq!(children[1], ("[1]".to_string(), i32_ty(), 12));
    }

    #[test]
    fn test_struct_with_generic_field() {
        let memory = memory();
        let ids = UniqueIds::default();
        let mut registry = IndirectRegistry::default();
        let ty = GeneralType::Struct(StructType {
            name: "Pair".to_string(),
            fields: vec![
                Field {
                    name: "a".to_string(),
                    ty: GeneralType::Generic("T".to_string()),
                },
                Field {
                    name: "b".to_string(),
                    ty: i32_ty(),
                },
                Field {
                    name: "c".to_string(),
                    ty: GeneralType::Generic("U".to_string()),
                },
                Field {
                    name: "d".to_string(),
                    ty: i32_ty(),
                },
            ],
            type_arguments: BTreeMap::from([("T".to_string(), i32_ty())]),
        });

        let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);
        let var = reader.read("s", &ty, 8).unwrap();
        assert_eq!(var.value, "{...}");
        assert_eq!(var.named_variables, Some(4));

        let entry = registry.get(var.variables_reference).unwrap().clone();
        let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);
        let children = reader.children(&entry);
        assert_eq!(
            children,
            vec![
                ("a".to_string(), i32_ty(), 8),
                ("b".to_string(), i32_ty(), 12)
            ]
        );
        assert_eq!(reader.read("a", &children[0].1, 8).unwrap().value, "-5");
    }

    #[test]
    fn test_generic_is_invariant_violation() {
        let memory = memory();
        let ids = UniqueIds::default();
        let mut registry = IndirectRegistry::default();
        let mut reader = VariableReader::new(&memory, 4, &mut registry, &ids);

        let err = reader
            .read("t", &GeneralType::Generic("T".to_string()), 8)
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
