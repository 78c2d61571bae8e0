use std::sync::Arc;

use flink::{
    Catalog, CatalogCreateInfo, Encoder, Fault, Interpreter, OpNode, OpScope, Operation, Value,
    ValueKind,
};

fn add_eval(_: &mut OpScope<'_>, args: &[Value]) -> Result<Value, Fault> {
    match (args[0].as_int(), args[1].as_int()) {
        (Some(a), Some(b)) => Ok(Value::Int(a + b)),
        _ => Err(Fault::TypeError {
            expected: "int",
            got: args[0].clone(),
        }),
    }
}

fn lt_eval(_: &mut OpScope<'_>, args: &[Value]) -> Result<Value, Fault> {
    match (args[0].as_int(), args[1].as_int()) {
        (Some(a), Some(b)) => Ok(Value::Bool(a < b)),
        _ => Err(Fault::TypeError {
            expected: "int",
            got: args[0].clone(),
        }),
    }
}

// Ref result: its value reaches consumers boxed, driving the flag
// transitions the second disassembly shows.
fn parse_eval(scope: &mut OpScope<'_>, _: &[Value]) -> Result<Value, Fault> {
    let text = scope.constant(0).clone();
    let parsed = text
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(Fault::TypeError {
            expected: "numeric string",
            got: text,
        })?;
    Ok(Value::Int(parsed))
}

fn main() {
    env_logger::init();

    let catalog = Arc::new(Catalog::new(CatalogCreateInfo::default()));
    let add = catalog
        .register_operation(Operation::new(
            "add",
            vec![ValueKind::Int, ValueKind::Int],
            Some(ValueKind::Int),
            add_eval,
        ))
        .unwrap();
    let lt = catalog
        .register_operation(Operation::new(
            "lt",
            vec![ValueKind::Int, ValueKind::Int],
            Some(ValueKind::Bool),
            lt_eval,
        ))
        .unwrap();
    let parse = catalog
        .register_operation(
            Operation::new("parse", vec![], Some(ValueKind::Ref), parse_eval).with_consts(1),
        )
        .unwrap();

    // local 0 = i, local 1 = acc
    // i = parse("1"); acc = 0; while i < 100 { acc += i; i += 1 }; acc
    let body = [
        OpNode::StoreLocal(
            0,
            Box::new(OpNode::Call {
                op: parse,
                args: vec![],
                consts: vec![Value::from("1")],
                children: vec![],
            }),
        ),
        OpNode::StoreLocal(1, Box::new(OpNode::constant(0i64))),
        OpNode::While {
            cond: Box::new(OpNode::call(lt, vec![
                OpNode::LoadLocal(0),
                OpNode::constant(100i64),
            ])),
            body: vec![
                OpNode::StoreLocal(
                    1,
                    Box::new(OpNode::call(add, vec![
                        OpNode::LoadLocal(1),
                        OpNode::LoadLocal(0),
                    ])),
                ),
                OpNode::StoreLocal(
                    0,
                    Box::new(OpNode::call(add, vec![
                        OpNode::LoadLocal(0),
                        OpNode::constant(1i64),
                    ])),
                ),
            ],
        },
        OpNode::Return(Box::new(OpNode::LoadLocal(1))),
    ];

    let unit = Encoder::compile(&catalog, 2, &body).unwrap();
    println!("before execution:\n{}", unit.disasm(&catalog));

    let interp = Interpreter::new(catalog.clone());
    let result = interp.execute(&unit, &[]).unwrap();
    println!("result: {result}");

    println!("after execution:\n{}", unit.disasm(&catalog));
}
