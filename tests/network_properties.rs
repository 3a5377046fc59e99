use neuroevo::matrix::Matrix;
use neuroevo::network::{snapshot, Network};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const XOR_TABLE: [([f32; 2], f32); 4] = [
    ([0.01, 0.01], 0.01),
    ([1.0, 1.0], 0.01),
    ([1.0, 0.01], 1.0),
    ([0.01, 1.0], 1.0),
];

fn round1(x: f32) -> f32 {
    (x * 10.0).round() / 10.0
}

fn xor_rows_correct(network: &Network) -> usize {
    XOR_TABLE
        .iter()
        .filter(|(input, target)| round1(network.query(input).unwrap()[0]) == round1(*target))
        .count()
}

/// XOR has no bias units here, so a bad draw of initial weights can stall in
/// a local minimum; require convergence for at least one of a few seeds.
#[test]
fn xor_converges() {
    let mut best = 0;
    for seed in 0..5u64 {
        let mut network = Network::new(0.1, &[2, 3, 3, 1], &mut ChaCha8Rng::seed_from_u64(seed)).unwrap();
        for _ in 0..200_000 {
            for (input, target) in &XOR_TABLE {
                network.train(input, &[*target]).unwrap();
            }
        }
        best = best.max(xor_rows_correct(&network));
        if best == 4 {
            return;
        }
    }
    panic!("no seed learned XOR, best was {best}/4 rows");
}

#[test]
fn training_reduces_error_on_a_sample() {
    let mut network = Network::new(0.1, &[3, 5, 2], &mut ChaCha8Rng::seed_from_u64(11)).unwrap();
    let input: [f32; 3] = [0.2, 0.7, 0.1];
    let target: [f32; 2] = [0.9, 0.1];
    let error = |n: &Network| -> f32 {
        let out = n.query(&input).unwrap();
        out.iter().zip(&target).map(|(o, t)| (t - o).powi(2)).sum()
    };
    let before = error(&network);
    for _ in 0..2000 {
        network.train(&input, &target).unwrap();
    }
    assert!(error(&network) < before * 0.5, "{} -> {}", before, error(&network));
}

#[test]
fn clone_is_deep() {
    let original = Network::new(0.1, &[4, 6, 2], &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
    let mut copy = original.clone();
    assert_eq!(copy, original);

    copy.train(&[0.1, 0.2, 0.3, 0.4], &[0.9, 0.1]).unwrap();
    assert_ne!(copy, original);

    let mut mutant = original.clone();
    mutant.mutate(1.0, 1.0, &mut ChaCha8Rng::seed_from_u64(3));
    assert_ne!(mutant, original);
    assert_eq!(original, Network::new(0.1, &[4, 6, 2], &mut ChaCha8Rng::seed_from_u64(2)).unwrap());
}

#[test]
fn mutated_clone_answers_differently() {
    let input: [f32; 2] = [0.1, 0.9];
    for seed in 0..20u64 {
        let original = Network::new(0.1, &[2, 2, 2], &mut ChaCha8Rng::seed_from_u64(seed)).unwrap();
        let mut mutant = original.clone();
        mutant.mutate(1.0, 1.0, &mut ChaCha8Rng::seed_from_u64(seed + 100));

        let before = original.query(&input).unwrap();
        let after = mutant.query(&input).unwrap();
        for (i, (a, b)) in before.iter().zip(&after).enumerate() {
            assert_ne!(a, b, "seed {seed}: output {i} unchanged by mutation");
        }
    }
}

#[test]
fn mutation_rate_bounds() {
    let original = Network::new(0.1, &[5, 7, 3], &mut ChaCha8Rng::seed_from_u64(4)).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    let mut untouched = original.clone();
    untouched.mutate(0.0, 2.0, &mut rng);
    assert_eq!(untouched, original);

    let mut every = original.clone();
    every.mutate(1.0, 2.0, &mut rng);
    let changed = every
        .weights()
        .iter()
        .zip(original.weights())
        .flat_map(|(a, b)| a.as_slice().iter().zip(b.as_slice()))
        .filter(|(a, b)| a != b)
        .count();
    assert_eq!(changed, original.weight_count());

    for (a, b) in every.weights().iter().zip(original.weights()) {
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert!((x - y).abs() <= 2.0);
        }
    }
}

#[test]
fn serialized_network_answers_identically() {
    let mut rng = ChaCha8Rng::seed_from_u64(6);
    for topology in [vec![2, 1], vec![24, 18, 18, 4], vec![3, 9, 9, 9, 2]] {
        let network = Network::new(0.25, &topology, &mut rng).unwrap();
        let from_json = snapshot::from_json(&snapshot::to_json(&network).unwrap()).unwrap();
        let from_bin = snapshot::decode_binary(&snapshot::encode_binary(&network)).unwrap();
        for _ in 0..10 {
            let x: Vec<f32> = (0..topology[0]).map(|_| rng.random()).collect();
            let expected = network.query(&x).unwrap();
            assert_eq!(from_json.query(&x).unwrap(), expected);
            assert_eq!(from_bin.query(&x).unwrap(), expected);
        }
        assert_eq!(snapshot::hash_weights(&from_json), snapshot::hash_weights(&network));
    }
}

#[test]
fn query_rejects_wrong_input_length() {
    let network = Network::new(0.1, &[3, 2], &mut ChaCha8Rng::seed_from_u64(7)).unwrap();
    assert!(network.query(&[0.1, 0.2]).is_err());
    let mut network = network;
    assert!(network.train(&[0.1, 0.2, 0.3], &[0.5]).is_err());
}

#[test]
fn from_parts_checks_layer_shapes() {
    let ok = Network::from_parts(0.1, vec![2, 3], vec![Matrix::new(3, 2)]);
    assert!(ok.is_ok());
    let transposed = Network::from_parts(0.1, vec![2, 3], vec![Matrix::new(2, 3)]);
    assert!(transposed.is_err());
}
