use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::{Display, IntoStaticStr};

/// Builtin scalar types known to the processor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BasicType {
    Void,
    Any,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
}

impl BasicType {
    /// Size of a value in bytes, `None` for types without storage.
    pub fn size(self) -> Option<usize> {
        match self {
            BasicType::Void | BasicType::Any => None,
            BasicType::U8 | BasicType::I8 => Some(1),
            BasicType::U16 | BasicType::I16 => Some(2),
            BasicType::U32 | BasicType::I32 | BasicType::F32 => Some(4),
            BasicType::U64 | BasicType::I64 => Some(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayType {
    pub of: Box<GeneralType>,
    #[serde(default)]
    pub length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: GeneralType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<Field>,
    /// Generic arguments bound on this struct instance.
    #[serde(default)]
    pub type_arguments: BTreeMap<String, GeneralType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionType {
    #[serde(default)]
    pub parameters: Vec<GeneralType>,
    pub returns: Box<GeneralType>,
    #[serde(default)]
    pub has_closure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasType {
    pub name: String,
    pub value: Box<GeneralType>,
}

/// Type of a value as described by the compiler debug metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneralType {
    Builtin(BasicType),
    Pointer(Box<GeneralType>),
    Array(ArrayType),
    Struct(StructType),
    Function(FunctionType),
    Generic(String),
    Alias(AliasType),
}

impl GeneralType {
    pub const VOID: GeneralType = GeneralType::Builtin(BasicType::Void);

    /// Return type with all aliases unwrapped.
    pub fn final_value(&self) -> &GeneralType {
        let mut current = self;
        while let GeneralType::Alias(alias) = current {
            current = &alias.value;
        }
        current
    }

    /// Statically known size of a value of this type.
    ///
    /// # Arguments
    ///
    /// * `pointer_size`: size of a pointer in the target processor
    pub fn size(&self, pointer_size: usize) -> Option<usize> {
        match self {
            GeneralType::Builtin(basic) => basic.size(),
            GeneralType::Pointer(_) | GeneralType::Function(_) => Some(pointer_size),
            GeneralType::Array(array) => {
                let length = array.length?;
                Some(array.of.size(pointer_size)? * length)
            }
            GeneralType::Struct(structure) => structure.fields.iter().try_fold(0, |acc, field| {
                let ty = field.ty.substitute(&structure.type_arguments);
                Some(acc + ty.size(pointer_size)?)
            }),
            GeneralType::Generic(_) => None,
            GeneralType::Alias(alias) => alias.value.size(pointer_size),
        }
    }

    /// Replace generic parameters by bound arguments.
    pub fn substitute(&self, arguments: &BTreeMap<String, GeneralType>) -> GeneralType {
        if arguments.is_empty() {
            return self.clone();
        }

        match self {
            GeneralType::Generic(name) => arguments
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            GeneralType::Builtin(_) => self.clone(),
            GeneralType::Pointer(to) => GeneralType::Pointer(Box::new(to.substitute(arguments))),
            GeneralType::Array(array) => GeneralType::Array(ArrayType {
                of: Box::new(array.of.substitute(arguments)),
                length: array.length,
            }),
            GeneralType::Struct(structure) => {
                let type_arguments = structure
                    .type_arguments
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.substitute(arguments)))
                    .collect();
                GeneralType::Struct(StructType {
                    name: structure.name.clone(),
                    fields: structure.fields.clone(),
                    type_arguments,
                })
            }
            GeneralType::Function(function) => GeneralType::Function(FunctionType {
                parameters: function
                    .parameters
                    .iter()
                    .map(|p| p.substitute(arguments))
                    .collect(),
                returns: Box::new(function.returns.substitute(arguments)),
                has_closure: function.has_closure,
            }),
            GeneralType::Alias(alias) => GeneralType::Alias(AliasType {
                name: alias.name.clone(),
                value: Box::new(alias.value.substitute(arguments)),
            }),
        }
    }
}

impl fmt::Display for GeneralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneralType::Builtin(basic) => write!(f, "{basic}"),
            GeneralType::Pointer(to) => write!(f, "{to}*"),
            GeneralType::Array(array) => match array.length {
                Some(length) => write!(f, "{}[{length}]", array.of),
                None => write!(f, "{}[]", array.of),
            },
            GeneralType::Struct(structure) => {
                f.write_str(&structure.name)?;
                if !structure.type_arguments.is_empty() {
                    write!(f, "<{}>", structure.type_arguments.values().join(", "))?;
                }
                Ok(())
            }
            GeneralType::Function(function) => {
                write!(
                    f,
                    "fn({}) -> {}",
                    function.parameters.iter().join(", "),
                    function.returns
                )
            }
            GeneralType::Generic(name) => f.write_str(name),
            GeneralType::Alias(alias) => f.write_str(&alias.name),
        }
    }
}
