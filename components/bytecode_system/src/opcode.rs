//! Bytecode opcodes.
//!
//! Instructions are streams of `u32` words. The first word of every
//! instruction is an opcode; the words that follow are immediates and nested
//! instructions, as documented on each variant. An argument list (`args`) is
//! a count word followed by `count` pairs of `[width] expr`.

use core_types::EngineError;

/// Every instruction the interpreter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    // Calls
    /// `vti recv args` - call a method from the receiver's class
    DispatchMethod = 0x01,
    /// `vti class args` - call a type method on a class value
    DispatchTypeMethod = 0x02,
    /// `pti mi tmp box args` - call a protocol method on a boxed receiver
    DispatchProtocol = 0x03,
    /// `vti class args` - call a superclass method on `this`
    DispatchSuper = 0x04,
    /// `fi ctx args` - call a function with an explicit context
    CallContextedFunction = 0x05,
    /// `fi args` - call a function without context
    CallFunction = 0x06,
    /// `vti class args` - run a superclass initializer on `this`
    SuperInitializer = 0x08,
    /// `vti class args` - allocate an instance and run an initializer
    NewObject = 0x09,

    // Control flow
    /// `width [expr]` - leave the function, producing `width` words
    Return = 0x10,
    /// `cond block` - loop while the condition holds
    RepeatWhile = 0x11,
    /// `length cond block {ElseIf cond block}* [Else block]`, where
    /// `length` counts every word after itself
    If = 0x12,
    /// Marks an else-if arm inside an `If`
    ElseIf = 0x13,
    /// `var tmp list block` - iterate a list's boxes into `var`
    ForInList = 0x14,
    /// `var start stop step block` - iterate an integer range into `var`
    ForInRange = 0x15,
    /// Marks the trailing else block inside an `If`
    Else = 0x16,

    // Objects
    /// The context value of the current frame
    This = 0x19,
    /// `a b` - identity comparison of two objects
    SameObject = 0x1A,

    // Stack variables
    /// `i` - one word from the frame
    GetVariable = 0x20,
    /// `i n` - `n` words from the frame
    GetVariableWide = 0x21,
    /// `i expr` - store one word into the frame
    SetVariable = 0x22,
    /// `i n expr` - store `n` words into the frame
    SetVariableWide = 0x23,
    /// `i` - add one to an integer variable
    IncrementVariable = 0x24,
    /// `i` - subtract one from an integer variable
    DecrementVariable = 0x25,

    // Instance variables of `this`
    /// `i` - one word from the instance
    GetInstanceVariable = 0x26,
    /// `i n` - `n` words from the instance
    GetInstanceVariableWide = 0x27,
    /// `i expr` - store one word into the instance
    SetInstanceVariable = 0x28,
    /// `i n expr` - store `n` words into the instance
    SetInstanceVariableWide = 0x29,
    /// `i` - add one to an integer instance variable
    IncrementInstanceVariable = 0x2A,
    /// `i` - subtract one from an integer instance variable
    DecrementInstanceVariable = 0x2B,

    // Value-type context
    /// `i` - one word through the context reference
    GetVtVariable = 0x2C,
    /// `i expr` - store one word through the context reference
    SetVtVariable = 0x2D,

    // References and literals
    /// `i` - reference to a frame variable
    StackReference = 0x40,
    /// `i` - reference to an instance variable of `this`
    InstanceReference = 0x41,
    /// `i` - the context reference moved `i` words
    VtReference = 0x42,
    /// `n ref` - `n` words read through a reference
    GetValueFromReference = 0x43,
    /// `expr` - class of an object
    ClassFromInstance = 0x44,
    /// `i` - class from the class table
    ClassFromIndex = 0x45,
    /// `i` - interned string
    StringPool = 0x46,
    /// Boolean true
    True = 0x47,
    /// Boolean false
    False = 0x48,
    /// `w` - the integer `w - i32::MAX`
    Integer32 = 0x49,
    /// `hi lo` - a 64-bit integer
    Integer64 = 0x4A,
    /// `hi lo exp` - a double encoded as scale and exponent
    Double = 0x4B,
    /// `c` - a Unicode scalar
    Symbol = 0x4C,
    /// The nothingness sentinel
    Nothingness = 0x4D,

    // Integer operators
    /// `a b` - raw word equality
    EqualPrimitive = 0x50,
    /// `a b` - symbol equality
    EqualSymbol = 0x51,
    /// `a b`
    SubtractInteger = 0x52,
    /// `a b`
    AddInteger = 0x53,
    /// `a b`
    MultiplyInteger = 0x54,
    /// `a b`
    DivideInteger = 0x55,
    /// `a b`
    RemainderInteger = 0x56,
    /// `a b`
    BinaryAnd = 0x57,
    /// `a b`
    BinaryOr = 0x58,
    /// `a b`
    BinaryXor = 0x59,
    /// `a`
    BinaryNot = 0x5A,
    /// `a b`
    ShiftLeft = 0x5B,
    /// `a b`
    ShiftRight = 0x5C,
    /// `a b`
    LessInteger = 0x5D,
    /// `a b`
    GreaterInteger = 0x5E,
    /// `a b`
    GreaterOrEqualInteger = 0x5F,
    /// `a b`
    LessOrEqualInteger = 0x60,

    // Boolean operators
    /// `a`
    InvertBoolean = 0x61,
    /// `a b` - both operands are always evaluated
    OrBoolean = 0x62,
    /// `a b` - both operands are always evaluated
    AndBoolean = 0x63,

    // Double operators
    /// `a b`
    EqualDouble = 0x64,
    /// `a b`
    SubtractDouble = 0x65,
    /// `a b`
    AddDouble = 0x66,
    /// `a b`
    MultiplyDouble = 0x67,
    /// `a b`
    DivideDouble = 0x68,
    /// `a b`
    LessDouble = 0x69,
    /// `a b`
    GreaterDouble = 0x6A,
    /// `a b`
    LessOrEqualDouble = 0x6B,
    /// `a b`
    GreaterOrEqualDouble = 0x6C,
    /// `a b`
    RemainderDouble = 0x6D,
    /// `a`
    IntegerToDouble = 0x6E,

    // Optionals, error unions and boxes
    /// `n expr` - payload of a simple optional, fatal on nothingness
    UnwrapOptional = 0x70,
    /// `expr` - a box, fatal if it holds nothingness
    UnwrapBoxOptional = 0x71,
    /// `n expr` - true if the first word is nothingness
    IsNothingness = 0x72,
    /// `n expr` - payload of an error union, fatal on error
    ErrorCheckOptional = 0x73,
    /// `expr` - a box, fatal if it holds an error
    ErrorCheckBoxOptional = 0x74,
    /// `n expr` - true if the first word is the error sentinel
    IsError = 0x75,
    /// `n expr` - wrap `n` words into a simple optional
    OptionalProduce = 0x76,
    /// `expr` - an error union holding the error code
    ErrorProduce = 0x77,
    /// `i n expr` - store the payload into variable `i` unless nothingness
    ConditionalProduce = 0x78,
    /// `type n expr` - box `n` words inline
    BoxProduce = 0x79,
    /// `type n expr` - box `n` words in a separate array object
    BoxProduceRemote = 0x7A,
    /// `n box` - payload of an inline box
    Unbox = 0x7B,
    /// `n box` - payload of a remote box
    UnboxRemote = 0x7C,
    /// `n box` - simple optional from an inline box
    BoxToOptional = 0x7D,
    /// `n box` - simple optional from a remote box
    BoxToOptionalRemote = 0x7E,
    /// `type n expr` - box from a simple optional
    OptionalToBox = 0x7F,

    // Casts
    /// `obj class` - optional object if it inherits from the class
    DowncastToClass = 0x80,
    /// `pi box` - the box if its value conforms to the protocol
    CastToProtocol = 0x81,
    /// `box class` - optional object if the box holds an instance of the class
    CastToClass = 0x82,
    /// `type box` - the box if it holds the given value type
    CastToValueType = 0x83,

    // Closures
    /// `callable args` - invoke a closure
    ExecuteCallable = 0x90,
    /// `fi count size dest {index size}* records bindThis`
    Closure = 0x91,
    /// `vti recv` - bind a method to a receiver
    CaptureMethod = 0x92,
    /// `vti class` - bind a type method to a class
    CaptureTypeMethod = 0x93,
    /// `fi ctx` - bind a function to a context
    CaptureContextedFunction = 0x94,

    // Collection literals
    /// `count {box}*`
    ListLiteral = 0xA0,
    /// `count {key box}*`
    DictionaryLiteral = 0xA1,
    /// `count {string}*`
    ConcatenateStrings = 0xA2,
}

impl TryFrom<u32> for Opcode {
    type Error = EngineError;

    fn try_from(word: u32) -> Result<Self, Self::Error> {
        use Opcode::*;
        let opcode = match word {
            0x01 => DispatchMethod,
            0x02 => DispatchTypeMethod,
            0x03 => DispatchProtocol,
            0x04 => DispatchSuper,
            0x05 => CallContextedFunction,
            0x06 => CallFunction,
            0x08 => SuperInitializer,
            0x09 => NewObject,
            0x10 => Return,
            0x11 => RepeatWhile,
            0x12 => If,
            0x13 => ElseIf,
            0x14 => ForInList,
            0x15 => ForInRange,
            0x16 => Else,
            0x19 => This,
            0x1A => SameObject,
            0x20 => GetVariable,
            0x21 => GetVariableWide,
            0x22 => SetVariable,
            0x23 => SetVariableWide,
            0x24 => IncrementVariable,
            0x25 => DecrementVariable,
            0x26 => GetInstanceVariable,
            0x27 => GetInstanceVariableWide,
            0x28 => SetInstanceVariable,
            0x29 => SetInstanceVariableWide,
            0x2A => IncrementInstanceVariable,
            0x2B => DecrementInstanceVariable,
            0x2C => GetVtVariable,
            0x2D => SetVtVariable,
            0x40 => StackReference,
            0x41 => InstanceReference,
            0x42 => VtReference,
            0x43 => GetValueFromReference,
            0x44 => ClassFromInstance,
            0x45 => ClassFromIndex,
            0x46 => StringPool,
            0x47 => True,
            0x48 => False,
            0x49 => Integer32,
            0x4A => Integer64,
            0x4B => Double,
            0x4C => Symbol,
            0x4D => Nothingness,
            0x50 => EqualPrimitive,
            0x51 => EqualSymbol,
            0x52 => SubtractInteger,
            0x53 => AddInteger,
            0x54 => MultiplyInteger,
            0x55 => DivideInteger,
            0x56 => RemainderInteger,
            0x57 => BinaryAnd,
            0x58 => BinaryOr,
            0x59 => BinaryXor,
            0x5A => BinaryNot,
            0x5B => ShiftLeft,
            0x5C => ShiftRight,
            0x5D => LessInteger,
            0x5E => GreaterInteger,
            0x5F => GreaterOrEqualInteger,
            0x60 => LessOrEqualInteger,
            0x61 => InvertBoolean,
            0x62 => OrBoolean,
            0x63 => AndBoolean,
            0x64 => EqualDouble,
            0x65 => SubtractDouble,
            0x66 => AddDouble,
            0x67 => MultiplyDouble,
            0x68 => DivideDouble,
            0x69 => LessDouble,
            0x6A => GreaterDouble,
            0x6B => LessOrEqualDouble,
            0x6C => GreaterOrEqualDouble,
            0x6D => RemainderDouble,
            0x6E => IntegerToDouble,
            0x70 => UnwrapOptional,
            0x71 => UnwrapBoxOptional,
            0x72 => IsNothingness,
            0x73 => ErrorCheckOptional,
            0x74 => ErrorCheckBoxOptional,
            0x75 => IsError,
            0x76 => OptionalProduce,
            0x77 => ErrorProduce,
            0x78 => ConditionalProduce,
            0x79 => BoxProduce,
            0x7A => BoxProduceRemote,
            0x7B => Unbox,
            0x7C => UnboxRemote,
            0x7D => BoxToOptional,
            0x7E => BoxToOptionalRemote,
            0x7F => OptionalToBox,
            0x80 => DowncastToClass,
            0x81 => CastToProtocol,
            0x82 => CastToClass,
            0x83 => CastToValueType,
            0x90 => ExecuteCallable,
            0x91 => Closure,
            0x92 => CaptureMethod,
            0x93 => CaptureTypeMethod,
            0x94 => CaptureContextedFunction,
            0xA0 => ListLiteral,
            0xA1 => DictionaryLiteral,
            0xA2 => ConcatenateStrings,
            _ => return Err(EngineError::illegal_instruction(word)),
        };
        Ok(opcode)
    }
}

impl From<Opcode> for u32 {
    fn from(opcode: Opcode) -> u32 {
        opcode as u32
    }
}
