// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! End-to-end checks of the gradient engine against hand-derived closed
//! forms and central finite differences of the normalized objective.

use clm_grammar::{GrammarTables, Sentence, Word};
use clm_model::{
    compute_gradients, CompositionModel, CompositionalScore, Execution, GradientClamp,
    LeafExpectations, ModelError, Parameters,
};
use clm_tensor::Tensor;

const EPS: f64 = 1e-5;
const TOL: f64 = 1e-6;

fn model_from(w: Tensor, u: Tensor, x: Tensor) -> CompositionModel {
    CompositionModel::new(Parameters::from_parts(w, u, x).unwrap())
}

fn sentence(indices: &[usize]) -> Sentence {
    Sentence::from_words(
        9,
        indices
            .iter()
            .map(|&i| Word::new(format!("w{i}"), i))
            .collect(),
    )
}

fn gradients_for(
    model: &CompositionModel,
    tables: &GrammarTables,
    s: &Sentence,
) -> clm_model::GradientSet {
    let score = CompositionalScore::compute(model, tables, s, Execution::Sequential).unwrap();
    let leaf = LeafExpectations::new(model).unwrap();
    compute_gradients(
        model,
        &score,
        &leaf,
        Execution::Sequential,
        &GradientClamp::default(),
    )
    .unwrap()
}

/// Negative log of the normalized leaf probability of word `target`:
/// `u.x_target + ln sum_v exp(-u.x_v)`.
fn leaf_objective(u: &Tensor, x: &Tensor, target: usize) -> f64 {
    let energy = u.dot(&x.column(target).unwrap()).unwrap();
    let z: f64 = (0..x.cols())
        .map(|v| (-u.dot(&x.column(v).unwrap()).unwrap()).exp())
        .sum();
    energy + z.ln()
}

#[test]
fn one_word_scenario_with_zero_weights() {
    // d = 2, zero composition weights, explicit embeddings. With a
    // single token there is no composition at all.
    let u = Tensor::column_vector(vec![0.6, -0.3]).unwrap();
    let x = Tensor::from_vec(2, 3, vec![0.8, -0.2, 0.1, 0.4, 0.9, -0.5]).unwrap();
    let model = model_from(Tensor::zeros(2, 4).unwrap(), u.clone(), x.clone());
    let s = sentence(&[1]);

    let mut tables = GrammarTables::zeros(1).unwrap();
    tables.set_inside_span(0, 1, 0.25).unwrap();
    // The grammar posterior of the only span equals its inside
    // probability, making mu the model's unnormalized joint weight.
    tables
        .set_mu_span_split_with_parent(0, 1, 0, 1, 0.25)
        .unwrap();

    let grads = gradients_for(&model, &tables, &s);
    let leaf = LeafExpectations::new(&model).unwrap();

    // No composition occurred: dQ/dW is exactly zero.
    assert_eq!(grads.w().max_abs(), 0.0);

    // Only the touched embedding column is populated, and it is the
    // normalized-leaf gradient (1 - P(w1)) u.
    assert_eq!(grads.x().len(), 1);
    let col = grads.x().column(1).unwrap();
    let expected = u.scale(1.0 - leaf.probability(1)).unwrap();
    for (a, b) in col.data().iter().zip(expected.data()) {
        assert!((a - b).abs() < 1e-12);
    }
    assert!(col.max_abs() > 0.0);

    // dQ/du = x_1 - E_lex[x].
    let expected_u = x
        .column(1)
        .unwrap()
        .sub(leaf.expected_energy_gradient())
        .unwrap();
    for (a, b) in grads.u().data().iter().zip(expected_u.data()) {
        assert!((a - b).abs() < 1e-12);
    }

    // Finite-difference check for dQ/du.
    for r in 0..2 {
        let mut u_plus = u.clone();
        u_plus.set(r, 0, u.get(r, 0) + EPS);
        let mut u_minus = u.clone();
        u_minus.set(r, 0, u.get(r, 0) - EPS);
        let fd = (leaf_objective(&u_plus, &x, 1) - leaf_objective(&u_minus, &x, 1)) / (2.0 * EPS);
        assert!(
            (fd - grads.u().get(r, 0)).abs() < TOL,
            "du[{r}]: fd={fd}, analytic={}",
            grads.u().get(r, 0)
        );
    }

    // Finite-difference check for the touched embedding column.
    for r in 0..2 {
        let mut x_plus = x.clone();
        x_plus.set(r, 1, x.get(r, 1) + EPS);
        let mut x_minus = x.clone();
        x_minus.set(r, 1, x.get(r, 1) - EPS);
        let fd = (leaf_objective(&u, &x_plus, 1) - leaf_objective(&u, &x_minus, 1)) / (2.0 * EPS);
        assert!(
            (fd - col.get(r, 0)).abs() < TOL,
            "dx[{r}]: fd={fd}, analytic={}",
            col.get(r, 0)
        );
    }
}

#[test]
fn two_word_all_ones_tables_match_closed_forms() {
    // The worked example: deterministic all-ones grammar tables, one
    // possible split. Every quantity below is a closed-form sum over
    // that split.
    let w = Tensor::random_uniform(2, 4, -0.5, 0.5, 77).unwrap();
    let u = Tensor::column_vector(vec![0.35, 0.15]).unwrap();
    let x = Tensor::from_vec(2, 4, vec![0.2, -0.4, 0.7, 0.1, -0.3, 0.5, 0.0, 0.6]).unwrap();
    let model = model_from(w, u, x);
    let s = sentence(&[0, 2]);
    let tables = GrammarTables::filled(2, 1.0).unwrap();

    let score = CompositionalScore::compute(&model, &tables, &s, Execution::Sequential).unwrap();
    let leaf = LeafExpectations::new(&model).unwrap();
    let grads = gradients_for(&model, &tables, &s);

    let x0 = model.word2vec(s.get(0).unwrap()).unwrap();
    let x1 = model.word2vec(s.get(1).unwrap()).unwrap();
    let z0 = model.leaf_score(&x0).unwrap();
    let z1 = model.leaf_score(&x1).unwrap();
    let c = model.compose(&x0, &x1).unwrap();
    let zc = (-model.energy_comp(&c, &x0, &x1).unwrap()).exp();
    let z = zc * z0 * z1;
    assert!((score.root_inside() - z).abs() < 1e-14);

    // With a single split the composed term cancels against its own
    // expectation; only the corrected leaf terms survive.
    let mu0 = z0 * (1.0 + zc * z1);
    let mu1 = z1 * (1.0 + zc * z0);
    let mut expected_u = Tensor::zeros(2, 1).unwrap();
    expected_u
        .add_scaled(&x0.sub(leaf.expected_energy_gradient()).unwrap(), mu0)
        .unwrap();
    expected_u
        .add_scaled(&x1.sub(leaf.expected_energy_gradient()).unwrap(), mu1)
        .unwrap();
    expected_u.scale_inplace(1.0 / z);
    for (a, b) in grads.u().data().iter().zip(expected_u.data()) {
        assert!((a - b).abs() < 1e-12);
    }

    // dQ/dW vanishes outright: the only split carries the whole split
    // distribution, so the expectation correction cancels it exactly.
    assert!(grads.w().max_abs() < 1e-12);
}

#[test]
fn two_word_energy_gradient_matches_finite_difference() {
    // Grammar tables chosen so mu equals the model's joint weight of
    // the single derivation; the normalized objective is then the sum
    // of the two normalized leaf terms (the single-split composition
    // term is constant).
    let w = Tensor::random_uniform(2, 4, -0.5, 0.5, 101).unwrap();
    let u = Tensor::column_vector(vec![0.45, -0.2]).unwrap();
    let x = Tensor::from_vec(2, 4, vec![0.3, -0.1, 0.8, 0.2, 0.4, -0.6, 0.1, 0.5]).unwrap();
    let model = model_from(w.clone(), u.clone(), x.clone());
    let s = sentence(&[0, 3]);

    let mut tables = GrammarTables::zeros(2).unwrap();
    for (start, end) in [(0, 1), (1, 2), (0, 2)] {
        tables.set_inside_span(start, end, 1.0).unwrap();
    }
    tables.set_inside_span_split(0, 2, 1, 1.0).unwrap();
    tables.set_mu_span_split_with_parent(0, 1, 0, 2, 1.0).unwrap();
    tables.set_mu_span_split_with_parent(1, 2, 1, 0, 1.0).unwrap();
    tables.set_mu_span_split_with_parent(0, 2, 1, 2, 1.0).unwrap();

    let grads = gradients_for(&model, &tables, &s);

    let objective = |u_t: &Tensor| -> f64 {
        leaf_objective(u_t, &x, 0) + leaf_objective(u_t, &x, 3)
    };
    for r in 0..2 {
        let mut u_plus = u.clone();
        u_plus.set(r, 0, u.get(r, 0) + EPS);
        let mut u_minus = u.clone();
        u_minus.set(r, 0, u.get(r, 0) - EPS);
        let fd = (objective(&u_plus) - objective(&u_minus)) / (2.0 * EPS);
        assert!(
            (fd - grads.u().get(r, 0)).abs() < TOL,
            "du[{r}]: fd={fd}, analytic={}",
            grads.u().get(r, 0)
        );
    }

    // The single-split normalized composition term has no W dependence,
    // and the engine's expectation correction reproduces that exactly.
    assert!(grads.w().max_abs() < 1e-12);
}

#[test]
fn zero_partition_function_is_a_fatal_gradient_error() {
    let model = model_from(
        Tensor::zeros(2, 4).unwrap(),
        Tensor::column_vector(vec![0.1, 0.2]).unwrap(),
        Tensor::random_uniform(2, 3, -0.5, 0.5, 3).unwrap(),
    );
    let s = sentence(&[0, 1]);
    let tables = GrammarTables::zeros(2).unwrap();
    let score = CompositionalScore::compute(&model, &tables, &s, Execution::Sequential).unwrap();
    let leaf = LeafExpectations::new(&model).unwrap();
    let err = compute_gradients(
        &model,
        &score,
        &leaf,
        Execution::Sequential,
        &GradientClamp::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ModelError::ZeroPartition { len: 2, .. }));
}

#[test]
fn sequential_and_parallel_gradients_agree_bitwise() {
    let model = CompositionModel::new(Parameters::new(3, 6, 55).unwrap());
    let s = sentence(&[0, 2, 4]);
    let tables = GrammarTables::filled(3, 0.7).unwrap();
    let leaf = LeafExpectations::new(&model).unwrap();

    let sequential_score =
        CompositionalScore::compute(&model, &tables, &s, Execution::Sequential).unwrap();
    let sequential = compute_gradients(
        &model,
        &sequential_score,
        &leaf,
        Execution::Sequential,
        &GradientClamp::default(),
    )
    .unwrap();

    let executor = clm_model::BlockExecutor::new(4, 2).unwrap();
    let parallel_score =
        CompositionalScore::compute(&model, &tables, &s, Execution::Blocks(&executor)).unwrap();
    let parallel = compute_gradients(
        &model,
        &parallel_score,
        &leaf,
        Execution::Blocks(&executor),
        &GradientClamp::default(),
    )
    .unwrap();

    assert_eq!(sequential.w().data(), parallel.w().data());
    assert_eq!(sequential.u().data(), parallel.u().data());
    assert_eq!(sequential.x().len(), parallel.x().len());
    for (index, column) in sequential.x().columns() {
        assert_eq!(column.data(), parallel.x().column(index).unwrap().data());
    }
}
