use proptest::prelude::*;

use crate::transparent;

use super::{Hash, LockTime, Transaction, Witness};

impl Arbitrary for Hash {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        any::<[u8; 32]>().prop_map(Hash).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for LockTime {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        any::<u32>().prop_map(LockTime::from).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

fn witness_strategy(input_count: usize) -> BoxedStrategy<Vec<Witness>> {
    prop_oneof![
        3 => Just(Vec::new()),
        1 => proptest::collection::vec(
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..75), 1..4),
            input_count..=input_count,
        ),
    ]
    .boxed()
}

impl Arbitrary for Transaction {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            1..3i32,
            proptest::collection::vec(any::<transparent::Input>(), 1..4),
            proptest::collection::vec(any::<transparent::Output>(), 1..4),
            any::<LockTime>(),
        )
            .prop_flat_map(|(version, inputs, outputs, lock_time)| {
                let input_count = inputs.len();
                (
                    Just(version),
                    Just(inputs),
                    Just(outputs),
                    Just(lock_time),
                    witness_strategy(input_count),
                )
            })
            .prop_map(|(version, inputs, outputs, lock_time, witnesses)| {
                let mut tx = Transaction::new(version, inputs, outputs, lock_time);
                tx.witnesses = witnesses;
                tx
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
