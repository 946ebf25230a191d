//! The seven end-to-end scenarios named in the spec, each driven through
//! `execute_capturing` and asserted against its literal printed output.

use crate::execute_capturing;

#[test]
fn arithmetic_and_precedence() {
    let (out, result) = execute_capturing("print(1 + 2 * 3 ^ 2)");
    assert!(result.is_ok());
    assert_eq!(out, "19\n");
}

#[test]
fn recursive_factorial() {
    let (out, result) = execute_capturing(
        r#"
        local function f(n) if n <= 1 then return 1 else return n * f(n-1) end end
        print(f(10))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "3628800\n");
}

#[test]
fn closure_capture_and_shared_upvalue() {
    let (out, result) = execute_capturing(
        r#"
        local function mk()
          local x = 0
          return function() x = x + 1; return x end,
                 function() return x end
        end
        local inc, get = mk()
        inc(); inc(); inc()
        print(get())
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "3\n");
}

#[test]
fn tail_recursive_sum_without_stack_growth() {
    let (out, result) = execute_capturing(
        r#"
        local function s(n, acc) if n == 0 then return acc else return s(n-1, acc+n) end end
        print(s(100000, 0))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "5000050000\n");
}

#[test]
fn generic_for_over_pairs() {
    let (out, result) = execute_capturing(
        r#"
        local t = {a=1, b=2, c=3}
        local sum = 0
        for _, v in pairs(t) do sum = sum + v end
        print(sum)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "6\n");
}

#[test]
fn protected_call_catches_error() {
    let (out, result) = execute_capturing(
        r#"
        local ok, err = pcall(function() error("boom") end)
        print(ok, err:match("boom") ~= nil)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "false\ttrue\n");
}

#[test]
fn coroutine_produces_sequence() {
    let (out, result) = execute_capturing(
        r#"
        local co = coroutine.create(function() for i=1,3 do coroutine.yield(i) end end)
        local _, a = coroutine.resume(co)
        local _, b = coroutine.resume(co)
        local _, c = coroutine.resume(co)
        print(a, b, c)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "1\t2\t3\n");
}
