use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hashfarm::model::{NewUser, Operation};
use hashfarm::{Amount, Config, Engine, User};
use tokio::runtime::Runtime;

/// Generates replay operations for benchmarking.
///
/// Registers `num_users` users, each one the referral of the previous, so
/// every purchase walks the whole referral table. Then each user deposits
/// and buys every machine in the catalog.
pub struct OpGenerator {
    num_users: u32,
    coins: Vec<String>,
    price: Amount,
    registered: u32,
    buyer: u32,
    step: usize,
}

impl OpGenerator {
    pub fn new(num_users: u32, config: &Config) -> Self {
        let price = Amount::from_cents(config.machines.iter().map(|m| m.price.cents()).sum());
        Self {
            num_users,
            coins: config.machines.iter().map(|m| m.coin.clone()).collect(),
            price,
            registered: 0,
            buyer: 0,
            step: 0,
        }
    }

    fn username(idx: u32) -> String {
        format!("user{idx}")
    }
}

impl Iterator for OpGenerator {
    type Item = Operation;

    fn next(&mut self) -> Option<Self::Item> {
        if self.registered < self.num_users {
            let idx = self.registered;
            self.registered += 1;
            return Some(Operation::Register {
                username: Self::username(idx),
                email: format!("user{idx}@example.com"),
                master: idx.checked_sub(1).map(Self::username),
            });
        }

        if self.buyer >= self.num_users {
            return None;
        }

        let user = Self::username(self.buyer);
        let op = match self.step {
            0 => Operation::Deposit {
                user,
                amount: self.price,
                platform: "bench".to_string(),
            },
            n => Operation::Purchase {
                user,
                coin: self.coins[n - 1].clone(),
            },
        };

        self.step += 1;
        if self.step > self.coins.len() {
            self.step = 0;
            self.buyer += 1;
        }
        Some(op)
    }
}

fn bench_replay(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("replay");

    for users in [100u32, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(users), &users, |b, &users| {
            b.iter(|| {
                rt.block_on(async {
                    let config = Config::default();
                    let generator = OpGenerator::new(users, &config);
                    let engine = Engine::new(config);
                    for op in generator {
                        let _ = black_box(engine.apply(op).await);
                    }
                    engine
                })
            });
        });
    }

    group.finish();
}

fn bench_purchase_cascade(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("purchase_cascade");

    // depth of the referral chain above the buyer
    for depth in [0usize, 1, 5, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                rt.block_on(async {
                    let engine = Engine::new(Config::default());
                    let mut master: Option<User> = None;
                    for i in 0..=depth {
                        let user = engine
                            .register(
                                NewUser::new(format!("u{i}"), format!("u{i}@example.com")),
                                master.as_ref().map(|m| m.affiliate_code.as_str()),
                            )
                            .unwrap();
                        master = Some(user);
                    }
                    let buyer = master.unwrap();
                    engine
                        .grant_bonus(buyer.id, Amount::from_cents(150_000))
                        .await
                        .unwrap();
                    black_box(engine.purchase(buyer.id, "BTC").await.unwrap())
                })
            });
        });
    }

    group.finish();
}

fn bench_concurrent_purchases(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent_purchases");
    group.sample_size(10);

    group.bench_function("1k_users_4_threads", |b| {
        b.iter(|| {
            rt.block_on(async {
                let engine = std::sync::Arc::new(Engine::new(Config::default()));
                let mut ids = Vec::new();
                let root = engine
                    .register(NewUser::new("root", "root@example.com"), None)
                    .unwrap();
                for i in 0..1_000 {
                    let user = engine
                        .register(
                            NewUser::new(format!("u{i}"), format!("u{i}@example.com")),
                            Some(&root.affiliate_code),
                        )
                        .unwrap();
                    engine
                        .grant_bonus(user.id, Amount::from_cents(12_000))
                        .await
                        .unwrap();
                    ids.push(user.id);
                }

                let handles: Vec<_> = ids
                    .into_iter()
                    .map(|id| {
                        let engine = engine.clone();
                        tokio::spawn(async move { engine.purchase(id, "XMR").await })
                    })
                    .collect();
                for handle in handles {
                    let _ = black_box(handle.await);
                }
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_replay,
    bench_purchase_cascade,
    bench_concurrent_purchases,
);

criterion_main!(benches);
