//! Arithmetic, metatables, and the universal invariants from spec §8.1.

use crate::execute_capturing;

#[test]
fn string_number_coercion_in_arithmetic() {
    let (out, result) = execute_capturing(r#"print("10" + 5, "3" * "4")"#);
    assert!(result.is_ok());
    assert_eq!(out, "15\t12\n");
}

#[test]
fn string_concatenation_coerces_numbers() {
    let (out, result) = execute_capturing(r#"print("x=" .. 1 .. "y=" .. 2.5)"#);
    assert!(result.is_ok());
    assert_eq!(out, "x=1y=2.5\n");
}

#[test]
fn metatable_index_function_is_consulted() {
    let (out, result) = execute_capturing(
        r#"
        local t = setmetatable({}, {__index = function(_, k) return "missing:" .. k end})
        print(t.foo)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "missing:foo\n");
}

#[test]
fn metatable_newindex_function_intercepts_assignment() {
    let (out, result) = execute_capturing(
        r#"
        local log = {}
        local t = setmetatable({}, {__newindex = function(_, k, v) log[#log+1] = k .. "=" .. tostring(v) end})
        t.a = 1
        t.b = 2
        print(log[1], log[2])
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "a=1\tb=2\n");
}

#[test]
fn arithmetic_metamethod_add() {
    let (out, result) = execute_capturing(
        r#"
        local mt = {__add = function(a, b) return a.v + b.v end}
        local a = setmetatable({v = 3}, mt)
        local b = setmetatable({v = 4}, mt)
        print(a + b)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "7\n");
}

#[test]
fn comparison_operators_and_short_circuit() {
    let (out, result) = execute_capturing(
        r#"
        print(1 < 2, 2 <= 2, 3 > 4, nil and error("short-circuited") or "ok")
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "true\ttrue\tfalse\tok\n");
}

#[test]
fn multiple_return_and_varargs() {
    let (out, result) = execute_capturing(
        r#"
        local function f(...) return ... end
        print(f(1, 2, 3))
        local function g() return 1, 2 end
        local a, b, c = g()
        print(a, b, c)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "1\t2\t3\n1\t2\tnil\n");
}

#[test]
fn runtime_error_reports_source_and_line() {
    let (_out, result) = execute_capturing("local x = nil\nx()");
    let err = result.expect_err("calling nil should error");
    assert!(err.to_string().contains(":2:"), "message was: {err}");
}

#[test]
fn stack_overflow_is_a_runtime_error_not_a_panic() {
    let (_out, result) = execute_capturing(
        r#"
        local function loop() return 1 + loop() end
        loop()
        "#,
    );
    assert!(result.is_err());
}
