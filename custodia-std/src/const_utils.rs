//! Const-evaluated assertions, usable in `const fn` contexts and at the top
//! level of a module so that invalid constants fail to compile rather than
//! panic at runtime.

/// Asserts that a `const`-evaluable boolean expression is `true`.
///
/// Unlike [`assert!`], this is checked at compile time: a `false` condition
/// is a compile error, not a runtime panic.
///
/// ```
/// custodia_std::const_assert!(1 + 1 == 2);
/// ```
#[macro_export]
macro_rules! const_assert {
    ($condition:expr) => {
        const _: () = assert!($condition);
    };
    ($condition:expr, $message:expr) => {
        const _: () = assert!($condition, $message);
    };
}

/// Asserts that two types have the same size, e.g. to pin down the size of
/// a wire-format struct or a hand-rolled enum discriminant.
#[macro_export]
macro_rules! const_assert_size_eq {
    ($lhs:ty, $rhs:ty) => {
        const _: () = assert!(
            ::std::mem::size_of::<$lhs>() == ::std::mem::size_of::<$rhs>()
        );
    };
}
