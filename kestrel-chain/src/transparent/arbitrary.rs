use proptest::prelude::*;

use super::{CoinbaseData, Input, OutPoint, Script};

impl Arbitrary for Input {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        prop_oneof![
            9 => (any::<OutPoint>(), any::<Script>(), any::<u32>()).prop_map(
                |(outpoint, unlock_script, sequence)| Input::PrevOut {
                    outpoint,
                    unlock_script,
                    sequence,
                }
            ),
            1 => (proptest::collection::vec(any::<u8>(), 0..95), any::<u32>()).prop_map(
                |(data, sequence)| Input::Coinbase {
                    data: CoinbaseData(data),
                    sequence,
                }
            ),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
