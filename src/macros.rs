// (c) Copyright 2025 Helsing GmbH. All rights reserved.
/// Convenience macro for creating dot values.
///
/// NOTE! This is mostly useful for tests, since it does not provide control
/// over the app field of a dot.
#[macro_export]
macro_rules! dot {
    ($node:expr, $seq:expr) => {
        const {
            $crate::causal_context::Dot::mint(
                $crate::causal_context::Identifier::new($node, 0),
                $seq,
            )
        }
    };
    ($node:expr, $app:expr, $seq:expr) => {
        const {
            $crate::causal_context::Dot::mint(
                $crate::causal_context::Identifier::new($node, $app),
                $seq,
            )
        }
    };
}

/// Convenience macro for creating a [`CausalContext`](crate::CausalContext) from the highest
/// delivered sequence number of each actor.
///
/// ```
/// use scalereg::{causal_context, Dot, Identifier};
/// let cc = causal_context!({@0.1: 6, @1.0: 3});
/// assert!(cc.dot_in(Dot::mint(Identifier::new(0, 1), 6)));
/// assert!(!cc.dot_in(Dot::mint(Identifier::new(1, 0), 4)));
/// ```
#[macro_export]
macro_rules! causal_context(
    ( { $( @$frac_id:literal : $seq:literal ),* $(,)? } ) => {
        {
            let tracks: ::std::vec::Vec<($crate::Identifier, u64)> = vec![
            $(
                {
                    // Unfortunately the source text 0.4 is lexed by rust as the floating point value 0.4.
                    // But we can stringify the floating point literal, and then parse it as a string.
                    let mut frac_id_str = stringify!($frac_id).splitn(2, '.');
                    let node = frac_id_str.next().unwrap().parse().expect("node number must be numerical");
                    let app = frac_id_str.next().expect("missing '.' after node number").parse().expect("app must be numerical");
                    ($crate::Identifier::new(node, app), $seq)
                },
            )*
            ];
            tracks.into_iter().collect::<$crate::CausalContext>()
        }
    }
);
