//! Operator boilerplate for newtype wrappers.
//!
//! `op!` generates the standard operator trait implementations for single-field
//! tuple structs, forwarding to the inner type. Three forms are supported:
//!
//! * `op!(binary Foo, Add, add)` implements `Add for Foo`,
//! * `op!(inplace Foo, AddAssign, add_assign)` implements `AddAssign for Foo`,
//! * `op!(unary Foo, Neg, neg)` implements `Neg for Foo`.

#[macro_export]
macro_rules! op {
    (binary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0, rhs.0))
            }
        }
    };
    (inplace $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            fn $method(&mut self, rhs: Self) {
                std::ops::$trait::$method(&mut self.0, rhs.0)
            }
        }
    };
    (unary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0))
            }
        }
    };
}
