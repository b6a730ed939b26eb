use gpcovar_gp::covariance::{
    CovarianceFunction, LinearCovariance, NoiseCovariance, ProductCovariance,
    SquaredExponentialCovariance, SumCovariance,
};
use gpcovar_gp::{
    optimize_hyperparams, CobylaMinimizer, GaussianProcess, HyperOptParams, Hyperparams, Prior,
    Priors, COVAR,
};
use ndarray::{array, concatenate, Array, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn main() {
    env_logger::init();

    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let xt = Array::linspace(0f64, 10., 30).insert_axis(Axis(1));
    let noise = Array::random_using((30, 1), Normal::new(0., 0.1).expect("normal law"), &mut rng);
    let yt = xt.mapv(|v| v.sin() + 0.1 * v) + noise;

    // smooth signal times a linear trend, plus a smooth residual and white noise
    let covariance = SumCovariance::<f64>::new(vec![
        Box::new(
            ProductCovariance::<f64>::new(vec![
                Box::new(SquaredExponentialCovariance::isotropic()),
                Box::new(LinearCovariance::isotropic()),
            ])
            .expect("product covariance"),
        ),
        Box::new(SquaredExponentialCovariance::isotropic()),
        Box::new(NoiseCovariance::new()),
    ])
    .expect("sum covariance");
    println!(
        "Covariance {covariance} with parameters {:?}",
        CovarianceFunction::<f64>::parameter_names(&covariance)
    );

    let gp = GaussianProcess::new(covariance)
        .with_data(&xt, &yt)
        .expect("training data");

    let start = Hyperparams::new().with_group(COVAR, array![0., 1., -1., 0., 0., -1.]);
    let priors = Priors::new().with_group(
        COVAR,
        vec![
            None,
            Some(Prior::Gamma {
                shape: 2.,
                scale: 2.,
            }),
            None,
            None,
            None,
            Some(Prior::Gaussian {
                mean: 0.1,
                std: 0.1,
            }),
        ],
    );
    let params = HyperOptParams::default()
        .bounds(COVAR, vec![(-6., 4.); 6])
        .priors(priors.clone())
        .max_eval(300)
        .gradcheck(true);

    let lml0 = gp
        .log_marginal_likelihood(&start, Some(&priors))
        .expect("likelihood");
    let (hp, lml) = optimize_hyperparams(&gp, &start, &params, &CobylaMinimizer::default())
        .expect("hyperparameters optimization");
    println!("Optimized {start} -> {hp}");
    println!("Negative log marginal likelihood {lml0} -> {lml}");

    let xtest = Array::linspace(-1f64, 11., 13).insert_axis(Axis(1));
    let (mean, variance) = gp.predict(&hp, &xtest, 0).expect("prediction");
    println!("Predictions (x, mean, std)");
    println!(
        "{}",
        concatenate![
            Axis(1),
            xtest,
            mean.insert_axis(Axis(1)),
            variance.mapv(f64::sqrt).insert_axis(Axis(1))
        ]
    );
}
