//! Integration tests for the lumen interpreter.
//!
//! Each test builds a Module in-memory using the builder API (or decodes a
//! hand-encoded body), instantiates it, and checks results and traps.

use lumen::{
    decode::decode_function_body,
    host::HostReturn,
    ir::{
        BlockType, F32BinOp, F64BinOp, Function, I32BinOp, I64BinOp, Instruction as Op, LoadOp,
        MemArg, SatOp, StoreOp, UnaryOp,
    },
    module::Module,
    runtime::Runtime,
    table::Table,
    trap::{ExecError, Trap},
    types::{FuncType, Val, ValType},
};

fn rt() -> Runtime {
    Runtime::new()
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn single_func(name: &str, params: &[ValType], results: &[ValType], body: Vec<Op>) -> Module {
    let mut m = Module::new();
    let idx = m.add_function(Function::new(
        name,
        FuncType { params: params.to_vec(), results: results.to_vec() },
        vec![],
        body,
    ));
    m.export(name, idx);
    m
}

/// Runs a parameterless body and returns its results.
fn eval(results: &[ValType], body: Vec<Op>) -> Result<Vec<Val>, ExecError> {
    let m = single_func("main", &[], results, body);
    rt().instantiate(&m).unwrap().invoke("main", &[])
}

fn eval_i32(body: Vec<Op>) -> i32 {
    eval(&[ValType::I32], body).unwrap()[0].as_i32().unwrap()
}

fn i32b(op: I32BinOp) -> Op {
    Op::I32Binary(op)
}

fn mem(offset: u32) -> MemArg {
    MemArg::new(0, offset)
}

fn fib_module() -> Module {
    let ty = FuncType::new([ValType::I32], [ValType::I32]);
    single_func(
        "fib",
        &ty.params,
        &ty.results,
        vec![
            Op::LocalGet(0),
            Op::I32Const(2),
            i32b(I32BinOp::LtS),
            Op::If {
                ty: BlockType::Value(ValType::I32),
                then: vec![Op::LocalGet(0)],
                otherwise: vec![
                    Op::LocalGet(0),
                    Op::I32Const(1),
                    i32b(I32BinOp::Sub),
                    Op::Call(0),
                    Op::LocalGet(0),
                    Op::I32Const(2),
                    i32b(I32BinOp::Sub),
                    Op::Call(0),
                    i32b(I32BinOp::Add),
                ],
            },
        ],
    )
}

// ── Basic arithmetic ──────────────────────────────────────────────────────────

#[test]
fn test_i32_add() {
    let m = single_func(
        "add",
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        vec![Op::LocalGet(0), Op::LocalGet(1), i32b(I32BinOp::Add)],
    );
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(
        machine.invoke("add", &[Val::I32(10), Val::I32(32)]).unwrap(),
        vec![Val::I32(42)]
    );
}

#[test]
fn test_wrapping_arithmetic() {
    assert_eq!(
        eval_i32(vec![Op::I32Const(i32::MAX), Op::I32Const(1), i32b(I32BinOp::Add)]),
        i32::MIN
    );
    assert_eq!(
        eval_i32(vec![Op::I32Const(i32::MIN), Op::I32Const(1), i32b(I32BinOp::Sub)]),
        i32::MAX
    );
    let r = eval(
        &[ValType::I64],
        vec![Op::I64Const(i64::MAX), Op::I64Const(2), Op::I64Binary(I64BinOp::Mul)],
    )
    .unwrap();
    assert_eq!(r, vec![Val::I64(-2)]);
}

#[test]
fn test_i32_div_by_zero() {
    let err = eval(
        &[ValType::I32],
        vec![Op::I32Const(7), Op::I32Const(0), i32b(I32BinOp::DivU)],
    )
    .unwrap_err();
    assert_eq!(err.trap, Trap::DivisionByZero);
    assert_eq!(err.site.map(|s| (s.opcode, s.offset)), Some((0x6E, 2)));
}

#[test]
fn test_signed_division_overflow() {
    let err = eval(
        &[ValType::I32],
        vec![Op::I32Const(i32::MIN), Op::I32Const(-1), i32b(I32BinOp::DivS)],
    )
    .unwrap_err();
    assert_eq!(err.trap, Trap::IntegerOverflow);
    assert_eq!(
        eval_i32(vec![Op::I32Const(i32::MIN), Op::I32Const(-1), i32b(I32BinOp::RemS)]),
        0
    );
}

#[test]
fn test_unsigned_division_differs_from_signed() {
    let div = |op| eval_i32(vec![Op::I32Const(-8), Op::I32Const(2), i32b(op)]);
    assert_eq!(div(I32BinOp::DivS), -4);
    assert_eq!(div(I32BinOp::DivU), 0x7FFF_FFFC);
    let rem = |op| eval_i32(vec![Op::I32Const(-7), Op::I32Const(2), i32b(op)]);
    assert_eq!(rem(I32BinOp::RemS), -1);
    assert_eq!(rem(I32BinOp::RemU), 1);
}

#[test]
fn test_shift_counts_wrap() {
    assert_eq!(eval_i32(vec![Op::I32Const(1), Op::I32Const(33), i32b(I32BinOp::Shl)]), 2);
    assert_eq!(
        eval_i32(vec![Op::I32Const(-1), Op::I32Const(36), i32b(I32BinOp::ShrU)]),
        0x0FFF_FFFF
    );
    let r = eval(
        &[ValType::I64],
        vec![Op::I64Const(-1), Op::I64Const(64), Op::I64Binary(I64BinOp::ShrU)],
    )
    .unwrap();
    assert_eq!(r, vec![Val::I64(-1)]);
    assert_eq!(
        eval_i32(vec![Op::I32Const(0x8000_0001u32 as i32), Op::I32Const(1), i32b(I32BinOp::Rotl)]),
        3
    );
}

#[test]
fn test_unsigned_comparison() {
    assert_eq!(eval_i32(vec![Op::I32Const(-1), Op::I32Const(1), i32b(I32BinOp::LtU)]), 0);
    assert_eq!(eval_i32(vec![Op::I32Const(-1), Op::I32Const(1), i32b(I32BinOp::LtS)]), 1);
    let r = eval(
        &[ValType::I32],
        vec![Op::I64Const(-1), Op::I64Const(0), Op::I64Binary(I64BinOp::GtU)],
    )
    .unwrap();
    assert_eq!(r, vec![Val::I32(1)]);
}

#[test]
fn test_clz_ctz_popcnt() {
    assert_eq!(eval_i32(vec![Op::I32Const(1), Op::Unary(UnaryOp::I32Clz)]), 31);
    assert_eq!(eval_i32(vec![Op::I32Const(8), Op::Unary(UnaryOp::I32Ctz)]), 3);
    assert_eq!(eval_i32(vec![Op::I32Const(-1), Op::Unary(UnaryOp::I32Popcnt)]), 32);
}

// ── Floating point ────────────────────────────────────────────────────────────

#[test]
fn test_float_min_max_signed_zero() {
    let r = eval(
        &[ValType::F32],
        vec![Op::F32Const(-0.0), Op::F32Const(0.0), Op::F32Binary(F32BinOp::Min)],
    )
    .unwrap();
    assert_eq!(r[0].as_f32().unwrap().to_bits(), (-0.0f32).to_bits());

    let r = eval(
        &[ValType::F64],
        vec![Op::F64Const(-0.0), Op::F64Const(0.0), Op::F64Binary(F64BinOp::Max)],
    )
    .unwrap();
    assert_eq!(r[0].as_f64().unwrap().to_bits(), 0.0f64.to_bits());

    let r = eval(
        &[ValType::F64],
        vec![Op::F64Const(f64::NAN), Op::F64Const(1.0), Op::F64Binary(F64BinOp::Min)],
    )
    .unwrap();
    assert!(r[0].as_f64().unwrap().is_nan());
}

#[test]
fn test_nearest_rounds_half_to_even() {
    let near = |x: f64| {
        eval(&[ValType::F64], vec![Op::F64Const(x), Op::Unary(UnaryOp::F64Nearest)]).unwrap()[0]
            .as_f64()
            .unwrap()
    };
    assert_eq!(near(-4.2), -4.0);
    assert_eq!(near(-4.8), -5.0);
    assert_eq!(near(-4.5), -4.0);
    assert_eq!(near(-5.5), -6.0);
    assert_eq!(near(-0.4).to_bits(), (-0.0f64).to_bits());
}

#[test]
fn test_f64_sqrt_and_copysign() {
    let r = eval(
        &[ValType::F64],
        vec![
            Op::F64Const(2.0),
            Op::Unary(UnaryOp::F64Sqrt),
            Op::F64Const(-1.0),
            Op::F64Binary(F64BinOp::Copysign),
        ],
    )
    .unwrap();
    assert_eq!(r, vec![Val::F64(-std::f64::consts::SQRT_2)]);
}

#[test]
fn test_comparisons_with_nan() {
    let cmp = |op| {
        eval_i32(vec![Op::F32Const(f32::NAN), Op::F32Const(f32::NAN), Op::F32Binary(op)])
    };
    assert_eq!(cmp(F32BinOp::Eq), 0);
    assert_eq!(cmp(F32BinOp::Ne), 1);
    assert_eq!(cmp(F32BinOp::Lt), 0);
}

// ── Conversions ───────────────────────────────────────────────────────────────

#[test]
fn test_sign_extension_ops() {
    let ext8 = |v| eval_i32(vec![Op::I32Const(v), Op::Unary(UnaryOp::I32Extend8S)]);
    assert_eq!(ext8(0x7f), 0x7f);
    assert_eq!(ext8(0x80), -0x80);
    assert_eq!(ext8(0xff), -1);
    let ext16 = |v| eval_i32(vec![Op::I32Const(v), Op::Unary(UnaryOp::I32Extend16S)]);
    assert_eq!(ext16(0x7fff), 0x7fff);
    assert_eq!(ext16(0x8000), i32::from(i16::MIN));
    assert_eq!(ext16(0xffff), -1);
}

#[test]
fn test_i64_extend_i32() {
    let r = eval(
        &[ValType::I64, ValType::I64],
        vec![
            Op::I32Const(-1),
            Op::Unary(UnaryOp::I64ExtendI32S),
            Op::I32Const(-1),
            Op::Unary(UnaryOp::I64ExtendI32U),
        ],
    )
    .unwrap();
    assert_eq!(r, vec![Val::I64(-1), Val::I64(0xFFFF_FFFF)]);
}

#[test]
fn test_truncation_saturates() {
    assert_eq!(
        eval_i32(vec![Op::F32Const(-1.0), Op::Saturating(SatOp::I32TruncSatF32U)]),
        0
    );
    assert_eq!(
        eval_i32(vec![Op::F64Const(5.0e9), Op::Unary(UnaryOp::I32TruncF64U)]),
        -1 // u32::MAX
    );
    assert_eq!(
        eval_i32(vec![Op::F64Const(f64::NAN), Op::Saturating(SatOp::I32TruncSatF64S)]),
        0
    );
    assert_eq!(
        eval_i32(vec![Op::F64Const(-3.0e10), Op::Unary(UnaryOp::I32TruncF64S)]),
        i32::MIN
    );
}

#[test]
fn test_f64_promote_f32() {
    let r = eval(
        &[ValType::F64],
        vec![Op::F32Const(1.5), Op::Unary(UnaryOp::F64PromoteF32)],
    )
    .unwrap();
    assert_eq!(r, vec![Val::F64(1.5)]);
}

// ── Locals, select ────────────────────────────────────────────────────────────

#[test]
fn test_local_set_get_tee() {
    let mut m = Module::new();
    let idx = m.add_function(Function::new(
        "f",
        FuncType::new([ValType::I32], [ValType::I32]),
        vec![ValType::I32],
        vec![
            Op::LocalGet(0),
            Op::I32Const(5),
            i32b(I32BinOp::Mul),
            Op::LocalTee(1),
            Op::LocalGet(1),
            i32b(I32BinOp::Add),
        ],
    ));
    m.export("f", idx);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("f", &[Val::I32(3)]).unwrap(), vec![Val::I32(30)]);
}

#[test]
fn test_select() {
    let sel = |c| eval_i32(vec![Op::I32Const(10), Op::I32Const(20), Op::I32Const(c), Op::Select]);
    assert_eq!(sel(1), 10);
    assert_eq!(sel(0), 20);
}

// ── Memory ────────────────────────────────────────────────────────────────────

#[test]
fn test_store_then_load16_u() {
    let v = eval_i32(vec![
        Op::I32Const(0),
        Op::I32Const(70_000),
        Op::Store(StoreOp::I32Store, mem(0)),
        Op::I32Const(0),
        Op::Load(LoadOp::I32Load16U, mem(0)),
    ]);
    assert_eq!(v, 70_000 % 65_536);
}

#[test]
fn test_store_load_preserves_bits() {
    let r = eval(
        &[ValType::I32, ValType::I64, ValType::F32, ValType::F64],
        vec![
            Op::I32Const(0),
            Op::I32Const(-123_456_789),
            Op::Store(StoreOp::I32Store, mem(0)),
            Op::I32Const(8),
            Op::I64Const(0x0123_4567_89AB_CDEF),
            Op::Store(StoreOp::I64Store, mem(0)),
            Op::I32Const(16),
            Op::F32Const(3.25),
            Op::Store(StoreOp::F32Store, mem(0)),
            Op::I32Const(24),
            Op::F64Const(-1.0e300),
            Op::Store(StoreOp::F64Store, mem(0)),
            Op::I32Const(0),
            Op::Load(LoadOp::I32Load, mem(0)),
            Op::I32Const(0),
            Op::Load(LoadOp::I64Load, mem(8)),
            Op::I32Const(0),
            Op::Load(LoadOp::F32Load, mem(16)),
            Op::I32Const(0),
            Op::Load(LoadOp::F64Load, mem(24)),
        ],
    )
    .unwrap();
    assert_eq!(
        r,
        vec![
            Val::I32(-123_456_789),
            Val::I64(0x0123_4567_89AB_CDEF),
            Val::F32(3.25),
            Val::F64(-1.0e300),
        ]
    );
}

#[test]
fn test_narrow_loads_extend() {
    let r = eval(
        &[ValType::I32, ValType::I32, ValType::I64, ValType::I64],
        vec![
            Op::I32Const(0),
            Op::I32Const(0x80),
            Op::Store(StoreOp::I32Store8, mem(0)),
            Op::I32Const(4),
            Op::I64Const(-1),
            Op::Store(StoreOp::I64Store32, mem(0)),
            Op::I32Const(0),
            Op::Load(LoadOp::I32Load8S, mem(0)),
            Op::I32Const(0),
            Op::Load(LoadOp::I32Load8U, mem(0)),
            Op::I32Const(4),
            Op::Load(LoadOp::I64Load32S, mem(0)),
            Op::I32Const(4),
            Op::Load(LoadOp::I64Load32U, mem(0)),
        ],
    )
    .unwrap();
    assert_eq!(
        r,
        vec![Val::I32(-128), Val::I32(128), Val::I64(-1), Val::I64(0xFFFF_FFFF)]
    );
}

#[test]
fn test_memory_oob() {
    let err = eval(
        &[ValType::I32],
        vec![Op::I32Const(65_535), Op::Load(LoadOp::I32Load, mem(0))],
    )
    .unwrap_err();
    assert_eq!(
        err.trap,
        Trap::MemoryOutOfBounds { address: 65_535, len: 4, size: 65_536 }
    );
}

#[test]
fn test_effective_address_does_not_wrap() {
    let err = eval(
        &[ValType::I32],
        vec![Op::I32Const(-1), Op::Load(LoadOp::I32Load8U, mem(1))],
    )
    .unwrap_err();
    assert_eq!(
        err.trap,
        Trap::MemoryOutOfBounds { address: 1 << 32, len: 1, size: 65_536 }
    );
}

#[test]
fn test_memory_grow_and_size() {
    let mut m = single_func(
        "grow",
        &[ValType::I32],
        &[ValType::I32, ValType::I32],
        vec![
            Op::LocalGet(0),
            Op::Unary(UnaryOp::MemoryGrow),
            Op::Nullary(lumen::ir::NullaryOp::MemorySize),
        ],
    );
    m.max_memory_pages = Some(3);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(
        machine.invoke("grow", &[Val::I32(2)]).unwrap(),
        vec![Val::I32(1), Val::I32(3)]
    );
    assert_eq!(
        machine.invoke("grow", &[Val::I32(1)]).unwrap(),
        vec![Val::I32(-1), Val::I32(3)]
    );
}

#[test]
fn test_data_segment() {
    let mut m = single_func(
        "peek",
        &[],
        &[ValType::I32],
        vec![Op::I32Const(9), Op::Load(LoadOp::I32Load8U, mem(0))],
    );
    m.add_data(8, b"hi".to_vec());
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("peek", &[]).unwrap(), vec![Val::I32(i32::from(b'i'))]);
    assert_eq!(machine.load(8, 2).unwrap(), b"hi");
}

// ── Control flow ──────────────────────────────────────────────────────────────

#[test]
fn test_nested_if_else() {
    // sign(x): -1, 0 or 1
    let m = single_func(
        "sign",
        &[ValType::I32],
        &[ValType::I32],
        vec![
            Op::LocalGet(0),
            Op::I32Const(0),
            i32b(I32BinOp::LtS),
            Op::If {
                ty: BlockType::Value(ValType::I32),
                then: vec![Op::I32Const(-1)],
                otherwise: vec![
                    Op::LocalGet(0),
                    Op::Unary(UnaryOp::I32Eqz),
                    Op::If {
                        ty: BlockType::Value(ValType::I32),
                        then: vec![Op::I32Const(0)],
                        otherwise: vec![Op::I32Const(1)],
                    },
                ],
            },
        ],
    );
    let mut machine = rt().instantiate(&m).unwrap();
    for (x, expected) in [(-9, -1), (0, 0), (4, 1)] {
        assert_eq!(machine.invoke("sign", &[Val::I32(x)]).unwrap(), vec![Val::I32(expected)]);
    }
}

#[test]
fn test_block_br_discards_intermediate_values() {
    let r = eval_i32(vec![
        Op::I32Const(1),
        Op::Block {
            ty: BlockType::Value(ValType::I32),
            body: vec![
                Op::I32Const(2),
                Op::I32Const(3),
                Op::Block {
                    ty: BlockType::Empty,
                    body: vec![Op::I32Const(4), Op::Br(1)],
                },
                Op::I32Const(99),
            ],
        },
        i32b(I32BinOp::Add),
    ]);
    assert_eq!(r, 1 + 4);
}

#[test]
fn test_br_table_with_default() {
    let m = single_func(
        "pick",
        &[ValType::I32],
        &[ValType::I32],
        vec![
            Op::Block {
                ty: BlockType::Empty,
                body: vec![
                    Op::Block {
                        ty: BlockType::Empty,
                        body: vec![
                            Op::Block {
                                ty: BlockType::Empty,
                                body: vec![
                                    Op::LocalGet(0),
                                    Op::BrTable { targets: vec![0, 1], default: 2 },
                                ],
                            },
                            Op::I32Const(100),
                            Op::ret(),
                        ],
                    },
                    Op::I32Const(101),
                    Op::ret(),
                ],
            },
            Op::I32Const(102),
        ],
    );
    let mut machine = rt().instantiate(&m).unwrap();
    for (i, expected) in [(0, 100), (1, 101), (2, 102), (77, 102), (-1, 102)] {
        assert_eq!(machine.invoke("pick", &[Val::I32(i)]).unwrap(), vec![Val::I32(expected)]);
    }
}

#[test]
fn test_loop_with_global_converges() {
    let mut m = single_func(
        "count",
        &[],
        &[ValType::I32],
        vec![
            Op::Loop {
                ty: BlockType::Empty,
                body: vec![
                    Op::GlobalGet(0),
                    Op::I32Const(1),
                    i32b(I32BinOp::Add),
                    Op::GlobalSet(0),
                    Op::GlobalGet(0),
                    Op::I32Const(10),
                    i32b(I32BinOp::LtS),
                    Op::BrIf(0),
                ],
            },
            Op::GlobalGet(0),
        ],
    );
    m.add_global(Val::I32(0), true);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("count", &[]).unwrap(), vec![Val::I32(10)]);
    assert_eq!(machine.global(0).unwrap(), Val::I32(10));
}

#[test]
fn test_unreachable_reports_site() {
    let err = eval(&[], vec![Op::nop(), Op::Nullary(lumen::ir::NullaryOp::Unreachable)])
        .unwrap_err();
    assert_eq!(err.trap, Trap::Unreachable);
    assert_eq!(err.to_string(), "trap: unreachable executed (opcode 0x00 at instruction 1)");
}

// ── Calls ─────────────────────────────────────────────────────────────────────

#[test]
fn test_call_passes_arguments_in_order() {
    let mut m = Module::new();
    let sub = m.add_function(Function::new(
        "sub",
        FuncType::new([ValType::I32, ValType::I32], [ValType::I32]),
        vec![],
        vec![Op::LocalGet(0), Op::LocalGet(1), i32b(I32BinOp::Sub)],
    ));
    let caller = m.add_function(Function::new(
        "caller",
        FuncType { params: vec![], results: vec![ValType::I32] },
        vec![],
        vec![Op::I32Const(50), Op::I32Const(8), Op::Call(sub)],
    ));
    m.export("caller", caller);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("caller", &[]).unwrap(), vec![Val::I32(42)]);

    machine.push_i32(1);
    machine.push_i32(2);
    assert_eq!(machine.call(sub).unwrap(), vec![Val::I32(-1)]);
    assert_eq!(machine.stack_len(), 0);
}

#[test]
fn test_fibonacci() {
    let m = fib_module();
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("fib", &[Val::I32(20)]).unwrap(), vec![Val::I32(6765)]);
}

#[test]
fn test_unbounded_recursion_traps_with_default_config() {
    let m = single_func("forever", &[ValType::I32], &[ValType::I32], vec![
        Op::LocalGet(0),
        Op::I32Const(1),
        i32b(I32BinOp::Add),
        Op::Call(0),
    ]);
    let mut machine = rt().instantiate(&m).unwrap();
    let err = machine.invoke("forever", &[Val::I32(0)]).unwrap_err();
    assert_eq!(err.trap, Trap::CallStackExhausted);
    assert_eq!(err.site.map(|s| s.opcode), Some(0x10));
    assert_eq!(machine.stack_len(), 0);

    // The machine stays usable after the trap.
    let err = machine.invoke("forever", &[Val::I32(0)]).unwrap_err();
    assert_eq!(err.trap, Trap::CallStackExhausted);
}

#[test]
fn test_deep_recursion_within_limit() {
    let m = fib_module();
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("fib", &[Val::I32(25)]).unwrap(), vec![Val::I32(75_025)]);

    // countdown(n) = n == 0 ? 0 : countdown(n - 1), 1000 frames deep
    let m = single_func("countdown", &[ValType::I32], &[ValType::I32], vec![
        Op::LocalGet(0),
        Op::If {
            ty: BlockType::Value(ValType::I32),
            then: vec![Op::LocalGet(0), Op::I32Const(1), i32b(I32BinOp::Sub), Op::Call(0)],
            otherwise: vec![Op::I32Const(0)],
        },
    ]);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("countdown", &[Val::I32(1000)]).unwrap(), vec![Val::I32(0)]);
}

fn indirect_module() -> (Module, FuncType) {
    let add_ty = FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
    let mut m = Module::new();
    let add = m.add_function(Function::new(
        "add",
        add_ty.clone(),
        vec![],
        vec![Op::LocalGet(0), Op::LocalGet(1), i32b(I32BinOp::Add)],
    ));
    let neg = m.add_function(Function::new(
        "neg",
        FuncType::new([ValType::I32], [ValType::I32]),
        vec![],
        vec![Op::I32Const(0), Op::LocalGet(0), i32b(I32BinOp::Sub)],
    ));
    let type_index = m.add_type(add_ty.clone());
    let dispatch = m.add_function(Function::new(
        "dispatch",
        FuncType::new([ValType::I32, ValType::I32, ValType::I32], [ValType::I32]),
        vec![],
        vec![
            Op::LocalGet(0),
            Op::LocalGet(1),
            Op::LocalGet(2),
            Op::CallIndirect { type_index, table_index: 0 },
        ],
    ));
    m.add_table(Table::with_elements(vec![None, None, Some(neg), Some(add), None]));
    m.export("add", add);
    m.export("dispatch", dispatch);
    (m, add_ty)
}

#[test]
fn test_indirect_call_matches_direct_call() {
    let (m, add_ty) = indirect_module();
    let mut machine = rt().instantiate(&m).unwrap();
    let direct = machine.invoke("add", &[Val::I32(40), Val::I32(2)]).unwrap();
    let indirect = machine
        .invoke("dispatch", &[Val::I32(40), Val::I32(2), Val::I32(3)])
        .unwrap();
    assert_eq!(direct, indirect);
    assert_eq!(indirect, vec![Val::I32(42)]);

    machine.push_i32(40);
    machine.push_i32(2);
    machine.push_i32(3);
    assert_eq!(machine.call_indirect(0, &add_ty).unwrap(), vec![Val::I32(42)]);
}

#[test]
fn test_indirect_call_traps() {
    let (m, _) = indirect_module();
    let mut machine = rt().instantiate(&m).unwrap();
    let mut dispatch = |slot| {
        machine
            .invoke("dispatch", &[Val::I32(1), Val::I32(2), Val::I32(slot)])
            .unwrap_err()
    };
    assert_eq!(dispatch(1).trap, Trap::UninitializedElement(1));
    assert_eq!(dispatch(2).trap, Trap::IndirectCallTypeMismatch);
    let err = dispatch(9);
    assert_eq!(err.trap, Trap::UndefinedElement(9));
    assert_eq!(err.site.map(|s| s.opcode), Some(0x11));
    assert_eq!(machine.stack_len(), 0);
}

#[test]
fn test_table_updates_are_visible() {
    let (m, _) = indirect_module();
    let mut machine = rt().instantiate(&m).unwrap();
    machine.table_mut(0).unwrap().set(1, Some(0)).unwrap();
    assert_eq!(
        machine.invoke("dispatch", &[Val::I32(5), Val::I32(6), Val::I32(1)]).unwrap(),
        vec![Val::I32(11)]
    );
}

// ── Host calls ────────────────────────────────────────────────────────────────

#[test]
fn test_host_single_return() {
    let mut m = Module::new();
    let double = m.register_host(
        "double",
        FuncType::new([ValType::I32], [ValType::I32]),
        |args| Ok(HostReturn::Single(Val::I32(args[0].as_i32().unwrap_or(0) * 2))),
    );
    let main = m.add_function(Function::new(
        "main",
        FuncType::new([ValType::I32], [ValType::I32]),
        vec![],
        vec![Op::LocalGet(0), Op::Call(double), Op::I32Const(1), i32b(I32BinOp::Add)],
    ));
    m.export("main", main);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("main", &[Val::I32(20)]).unwrap(), vec![Val::I32(41)]);
}

#[test]
fn test_host_homogeneous_multi_return_order() {
    let mut m = Module::new();
    let triple = m.register_host(
        "triple",
        FuncType { params: vec![], results: vec![ValType::I32; 3] },
        |_| Ok(HostReturn::I32s(vec![1, 2, 3])),
    );
    let main = m.add_function(Function::new(
        "main",
        FuncType { params: vec![], results: vec![ValType::I32] },
        vec![ValType::I32; 3],
        vec![
            Op::Call(triple),
            Op::LocalSet(2),
            Op::LocalSet(1),
            Op::LocalSet(0),
            Op::LocalGet(0),
            Op::I32Const(100),
            i32b(I32BinOp::Mul),
            Op::LocalGet(1),
            Op::I32Const(10),
            i32b(I32BinOp::Mul),
            i32b(I32BinOp::Add),
            Op::LocalGet(2),
            i32b(I32BinOp::Add),
        ],
    ));
    m.export("main", main);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("main", &[]).unwrap(), vec![Val::I32(123)]);
}

#[test]
fn test_host_heterogeneous_tuple() {
    let mut m = Module::new();
    let pair = m.register_host(
        "pair",
        FuncType { params: vec![], results: vec![ValType::I32, ValType::F64] },
        |_| Ok(HostReturn::Tuple(vec![Val::I32(7), Val::F64(2.5)])),
    );
    m.export("pair", pair);
    let main = m.add_function(Function::new(
        "main",
        FuncType { params: vec![], results: vec![ValType::I32] },
        vec![],
        vec![Op::Call(pair), Op::drop()],
    ));
    m.export("main", main);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("pair", &[]).unwrap(), vec![Val::I32(7), Val::F64(2.5)]);
    assert_eq!(machine.invoke("main", &[]).unwrap(), vec![Val::I32(7)]);
}

#[test]
fn test_host_errors_and_mismatches() {
    let mut m = Module::new();
    let bad = m.register_host(
        "bad",
        FuncType { params: vec![], results: vec![ValType::I32] },
        |_| Ok(HostReturn::Single(Val::F32(1.0))),
    );
    let boom = m.register_host("boom", FuncType::default(), |_| {
        Err(Trap::HostError("boom".into()))
    });
    m.export("bad", bad);
    m.export("boom", boom);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("bad", &[]).unwrap_err().trap, Trap::HostSignatureMismatch);
    assert_eq!(
        machine.invoke("boom", &[]).unwrap_err().trap,
        Trap::HostError("boom".into())
    );
}

// ── Invocation errors ─────────────────────────────────────────────────────────

#[test]
fn test_undefined_export() {
    let m = single_func("f", &[], &[], vec![]);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(
        machine.invoke("missing", &[]).unwrap_err().trap,
        Trap::UndefinedExport("missing".into())
    );
}

#[test]
fn test_argument_mismatch() {
    let m = single_func("f", &[ValType::I64], &[], vec![]);
    let mut machine = rt().instantiate(&m).unwrap();
    assert!(matches!(
        machine.invoke("f", &[Val::I32(1)]).unwrap_err().trap,
        Trap::ArgumentMismatch(_)
    ));
}

#[test]
fn test_stack_is_clean_after_trap() {
    let m = single_func(
        "f",
        &[],
        &[ValType::I32],
        vec![Op::I32Const(1), Op::I32Const(2), Op::I32Const(0), i32b(I32BinOp::DivS)],
    );
    let mut machine = rt().instantiate(&m).unwrap();
    assert!(machine.invoke("f", &[]).is_err());
    assert_eq!(machine.stack_len(), 0);
}

// ── Decoding and running ──────────────────────────────────────────────────────

fn decode_and_run(bytes: &[u8], ty: FuncType, args: &[Val]) -> Result<Vec<Val>, lumen::Error> {
    let body = decode_function_body(bytes)?;
    let mut m = Module::new();
    let f = m.add_function(Function::new("f", ty, vec![], body));
    m.export("f", f);
    let mut machine = rt().instantiate(&m)?;
    Ok(machine.invoke("f", args)?)
}

#[test]
fn test_decoded_abs() {
    // local.get 0; i32.const 0; i32.lt_s
    // if (result i32) i32.const 0; local.get 0; i32.sub else local.get 0 end
    let bytes = [
        0x20, 0x00, 0x41, 0x00, 0x48, 0x04, 0x7F, 0x41, 0x00, 0x20, 0x00, 0x6B, 0x05, 0x20, 0x00,
        0x0B, 0x0B,
    ];
    let ty = FuncType::new([ValType::I32], [ValType::I32]);
    for (x, expected) in [(-5, 5), (3, 3), (0, 0)] {
        assert_eq!(
            decode_and_run(&bytes, ty.clone(), &[Val::I32(x)]).unwrap(),
            vec![Val::I32(expected)]
        );
    }
}

#[test]
fn test_decode_and_exec_errors_are_distinguished() {
    let ty = FuncType { params: vec![], results: vec![ValType::I32] };
    match decode_and_run(&[0x41, 0x01, 0xD7, 0x0B], ty.clone(), &[]) {
        Err(lumen::Error::Decode(e)) => {
            assert_eq!(e, lumen::DecodeError::UnknownOpcode { byte: 0xD7, offset: 2 })
        }
        other => panic!("expected decode error, got {other:?}"),
    }
    match decode_and_run(&[0x41, 0x01, 0x41, 0x00, 0x6D, 0x0B], ty, &[]) {
        Err(lumen::Error::Exec(e)) => {
            assert_eq!(e.trap, Trap::DivisionByZero);
            assert_eq!(e.site.map(|s| s.offset), Some(2));
        }
        other => panic!("expected trap, got {other:?}"),
    }
}

#[test]
fn test_deeply_nested_body_is_a_decode_error() {
    let mut bytes = [0x02, 0x40].repeat(10_000);
    bytes.push(0x0B);
    let ty = FuncType::default();
    match decode_and_run(&bytes, ty, &[]) {
        Err(lumen::Error::Decode(e)) => assert_eq!(
            e,
            lumen::DecodeError::NestingTooDeep { offset: 2 * lumen::decode::MAX_NESTING }
        ),
        other => panic!("expected decode error, got {other:?}"),
    }

    // Other bodies still decode and run.
    let ok = [0x41, 0x05, 0x0B];
    let ty = FuncType { params: vec![], results: vec![ValType::I32] };
    assert_eq!(decode_and_run(&ok, ty, &[]).unwrap(), vec![Val::I32(5)]);
}

#[test]
fn test_decoded_loop_sum() {
    // sum 1..=n with locals: (param n) (local acc)
    // loop
    //   local.get 1; local.get 0; i32.add; local.set 1
    //   local.get 0; i32.const 1; i32.sub; local.tee 0
    //   br_if 0
    // end
    // local.get 1
    let entry = [
        0x19, // size
        0x01, 0x01, 0x7F, // one i32 local
        0x03, 0x40, // loop (empty)
        0x20, 0x01, 0x20, 0x00, 0x6A, 0x21, 0x01, // acc += n
        0x20, 0x00, 0x41, 0x01, 0x6B, 0x22, 0x00, // n = n - 1
        0x0D, 0x00, // br_if 0
        0x0B, // end loop
        0x20, 0x01, // local.get 1
        0x0B,
    ];
    let mut m = Module::new();
    let f = m
        .add_code_entry("sum", FuncType::new([ValType::I32], [ValType::I32]), &entry)
        .unwrap();
    m.export("sum", f);
    let mut machine = rt().instantiate(&m).unwrap();
    assert_eq!(machine.invoke("sum", &[Val::I32(10)]).unwrap(), vec![Val::I32(55)]);
}
