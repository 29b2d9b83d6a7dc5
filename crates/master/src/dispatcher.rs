//! Mining dispatch: decides what the next mined block should be (a root
//! block or a minor block in some shard) by comparing each branch's
//! economic return ("eco" -- coinbase amount per unit difficulty) across
//! every slave-reported candidate.

use std::collections::HashMap;
use std::sync::Arc;

use cluster_rpc::{Address, Branch, BlockBytes, EcoInfo, RootBlock, ShardMask};
use rand::Rng;

use crate::collaborators::RootState;
use crate::registry::ClusterRegistry;

pub enum MiningCandidate {
    Root(RootBlock),
    Minor(BlockBytes),
}

/// `shard_mask_value == 0` considers the root chain and every shard;
/// otherwise only branches whose id matches `shard_mask_value` compete.
/// `randomize_output` enables the tie-break reservoir sample, used during
/// bootstrap when many branches legitimately tie on eco.
pub async fn get_next_block_to_mine(
    registry: &ClusterRegistry,
    root_state: &Arc<dyn RootState>,
    address: Address,
    shard_mask_value: u32,
    randomize_output: bool,
    artificial_tx_count: u32,
    proof_of_progress_blocks: u32,
    rng: &mut impl Rng,
) -> Option<MiningCandidate> {
    let shard_mask = (shard_mask_value != 0).then_some(ShardMask(shard_mask_value));

    let candidate_slaves: Vec<_> = match shard_mask {
        Some(mask) => registry
            .slaves()
            .iter()
            .filter(|link| link.has_overlap(mask))
            .cloned()
            .collect(),
        None => registry.slaves().to_vec(),
    };

    let mut branch_to_eco: HashMap<u64, EcoInfo> = HashMap::new();
    for slave in &candidate_slaves {
        let response = match slave.get_eco_info_list().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(slave_id = %slave.id, %err, "eco info request failed, skipping mining round");
                return None;
            }
        };
        if response.error_code != 0 {
            tracing::warn!(slave_id = %slave.id, "slave reported an error fetching eco info");
            return None;
        }
        for eco_info in response.eco_info_list {
            branch_to_eco.insert(eco_info.branch.value(), eco_info);
        }
    }

    let root_coinbase_amount: u64 = branch_to_eco
        .values()
        .map(|info| info.unconfirmed_headers_coinbase_amount)
        .sum::<u64>()
        / 2;
    let root_difficulty = root_state.next_block_difficulty().await;

    let winner = select_branch_with_max_eco(
        &branch_to_eco,
        shard_mask,
        randomize_output,
        root_coinbase_amount,
        root_difficulty,
        rng,
    );

    match winner {
        Some(0) => {
            create_root_block_to_mine_or_fallback(
                registry,
                root_state,
                address,
                proof_of_progress_blocks,
                artificial_tx_count,
            )
            .await
        }
        Some(branch_value) => {
            get_minor_block_to_mine(registry, Branch(branch_value), address, artificial_tx_count)
                .await
        }
        None => None,
    }
}

/// Pure eco-ratio comparison over a snapshot of per-branch info, split out
/// of `get_next_block_to_mine` so the selection rule (including its
/// reservoir-sample tie-break) can be exercised without a live cluster.
/// Returns the winning branch value, where `0` stands for the root chain.
fn select_branch_with_max_eco(
    branch_to_eco: &HashMap<u64, EcoInfo>,
    shard_mask: Option<ShardMask>,
    randomize_output: bool,
    root_coinbase_amount: u64,
    root_difficulty: u64,
    rng: &mut impl Rng,
) -> Option<u64> {
    // `Some(0)` is the sentinel meaning "the root chain is itself an
    // eligible candidate"; it is only eligible when the caller asked to
    // consider the whole cluster (no shard mask).
    let mut branch_value_with_max_eco: Option<u64> = shard_mask.is_none().then_some(0);
    let mut max_eco = root_coinbase_amount as f64 / root_difficulty as f64;
    let mut dup_eco_count: u64 = 1;
    let mut block_height: u64 = 0;

    for (branch_value, eco_info) in branch_to_eco {
        if let Some(mask) = shard_mask {
            if !mask.contains_branch(Branch(*branch_value)) {
                continue;
            }
        }
        let eco = eco_info.coinbase_amount as f64 / eco_info.difficulty as f64;
        let is_strictly_better = branch_value_with_max_eco.is_none()
            || eco > max_eco
            || (eco == max_eco
                && branch_value_with_max_eco.unwrap_or(0) > 0
                && block_height > eco_info.height);
        if is_strictly_better {
            branch_value_with_max_eco = Some(*branch_value);
            max_eco = eco;
            dup_eco_count = 1;
            block_height = eco_info.height;
        } else if eco == max_eco && randomize_output {
            // A tied candidate with a smaller height should be mined
            // first; only consider this one for the reservoir swap if it
            // is not strictly taller than the current pick.
            if branch_value_with_max_eco.unwrap_or(0) > 0 && block_height < eco_info.height {
                continue;
            }
            dup_eco_count += 1;
            if rng.gen::<f64>() < 1.0 / dup_eco_count as f64 {
                branch_value_with_max_eco = Some(*branch_value);
                max_eco = eco;
            }
        }
    }

    branch_value_with_max_eco
}

async fn create_root_block_to_mine_or_fallback(
    registry: &ClusterRegistry,
    root_state: &Arc<dyn RootState>,
    address: Address,
    proof_of_progress_blocks: u32,
    artificial_tx_count: u32,
) -> Option<MiningCandidate> {
    let mut shard_id_to_headers = HashMap::new();
    for slave in registry.slaves() {
        let response = match slave.get_unconfirmed_headers().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(slave_id = %slave.id, %err, "unconfirmed headers request failed");
                return None;
            }
        };
        if response.error_code != 0 {
            return None;
        }
        for headers_info in response.headers_info_list {
            if headers_info.branch.shard_size() != registry.shard_size() {
                tracing::error!(
                    expected = registry.shard_size(),
                    got = headers_info.branch.shard_size(),
                    "slave reported headers for the wrong shard size"
                );
                return None;
            }
            shard_id_to_headers.insert(headers_info.branch.shard_id(), headers_info.header_list);
        }
    }

    // Built directly in shard-id order, one `HeadersInfo` per shard, so the
    // list handed to `create_block_to_mine` stays in shard-id order -- a
    // regroup through a `HashMap` would scramble it (iteration order is
    // nondeterministic) and produce a nondeterministic root block.
    let mut headers_info_list = Vec::with_capacity(registry.shard_size() as usize);
    for shard_id in 0..registry.shard_size() {
        let branch = Branch::create(registry.shard_size(), shard_id);
        let headers = shard_id_to_headers.remove(&shard_id).unwrap_or_default();
        if headers.len() < proof_of_progress_blocks as usize {
            return get_minor_block_to_mine(registry, branch, address, artificial_tx_count).await;
        }
        headers_info_list.push(cluster_rpc::HeadersInfo {
            branch,
            header_list: headers,
        });
    }

    match root_state.create_block_to_mine(headers_info_list, address).await {
        Ok(block) => Some(MiningCandidate::Root(block)),
        Err(err) => {
            tracing::error!(%err, "root state failed to assemble a block to mine");
            None
        }
    }
}

async fn get_minor_block_to_mine(
    registry: &ClusterRegistry,
    branch: Branch,
    address: Address,
    artificial_tx_count: u32,
) -> Option<MiningCandidate> {
    let slave = match registry.dispatch_slave(branch) {
        Ok(slave) => slave,
        Err(err) => {
            tracing::error!(%err, "no slave serves this branch");
            return None;
        }
    };
    let response = match slave
        .get_next_block_to_mine(branch, address.address_in_branch(branch), artificial_tx_count)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(slave_id = %slave.id, %err, "get_next_block_to_mine rpc failed");
            return None;
        }
    };
    if response.error_code != 0 {
        return None;
    }
    response.block.map(MiningCandidate::Minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn eco_info(branch: Branch, height: u64, difficulty: u64, coinbase_amount: u64) -> EcoInfo {
        EcoInfo {
            branch,
            height,
            difficulty,
            coinbase_amount,
            unconfirmed_headers_coinbase_amount: 0,
        }
    }

    // S1: two shards tied on eco, root has nothing to mine -- the shard
    // with the lower height wins.
    #[test]
    fn s1_tie_breaks_toward_lower_height() {
        let shard_size = 2;
        let branch_a = Branch::create(shard_size, 0);
        let branch_b = Branch::create(shard_size, 1);
        let branch_to_eco = HashMap::from([
            (branch_a.value(), eco_info(branch_a, 5, 10, 10)),
            (branch_b.value(), eco_info(branch_b, 2, 10, 10)),
        ]);
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);

        let winner = select_branch_with_max_eco(&branch_to_eco, None, false, 0, 1, &mut rng);

        assert_eq!(winner, Some(branch_b.value()));
    }

    // S2: root_eco = 10, shard A eco = 15, shard B eco = 5 -- shard A wins.
    #[test]
    fn s2_highest_eco_wins() {
        let shard_size = 2;
        let branch_a = Branch::create(shard_size, 0);
        let branch_b = Branch::create(shard_size, 1);
        let branch_to_eco = HashMap::from([
            (branch_a.value(), eco_info(branch_a, 0, 2, 30)),
            (branch_b.value(), eco_info(branch_b, 0, 10, 50)),
        ]);
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);

        // root_coinbase_amount=200 halved by the caller before this point,
        // so pass the halved figure directly: 200 / 2 = 100, difficulty 10.
        let winner = select_branch_with_max_eco(&branch_to_eco, None, false, 100, 10, &mut rng);

        assert_eq!(winner, Some(branch_a.value()));
    }

    // S3: identical inputs to S2 -- the PROOF_OF_PROGRESS_BLOCKS check only
    // applies inside the root-block assembly path, not branch selection.
    #[test]
    fn s3_selection_ignores_proof_of_progress() {
        let shard_size = 2;
        let branch_a = Branch::create(shard_size, 0);
        let branch_b = Branch::create(shard_size, 1);
        let branch_to_eco = HashMap::from([
            (branch_a.value(), eco_info(branch_a, 0, 2, 30)),
            (branch_b.value(), eco_info(branch_b, 0, 10, 50)),
        ]);
        let mut rng = rand::rngs::SmallRng::seed_from_u64(7);

        let winner = select_branch_with_max_eco(&branch_to_eco, None, false, 100, 10, &mut rng);

        assert_eq!(winner, Some(branch_a.value()));
    }

    // S4: root and every shard tied, randomize_output=true -- over 10,000
    // trials each of the N+1 candidates should be picked with frequency
    // within 5% of uniform.
    #[test]
    fn s4_reservoir_tie_break_is_roughly_uniform() {
        let shard_size = 3;
        let branches: Vec<Branch> = (0..shard_size)
            .map(|id| Branch::create(shard_size, id))
            .collect();
        let branch_to_eco: HashMap<u64, EcoInfo> = branches
            .iter()
            .map(|&branch| (branch.value(), eco_info(branch, 0, 10, 10)))
            .collect();

        let candidate_count = branches.len() + 1; // + the root chain
        let mut counts = HashMap::new();
        let mut rng = rand::rngs::SmallRng::seed_from_u64(42);

        const TRIALS: u32 = 10_000;
        for _ in 0..TRIALS {
            // root_coinbase_amount=10, root_difficulty=10 ties the root
            // chain's eco (1) with every shard's eco (10/10 = 1) above.
            let winner =
                select_branch_with_max_eco(&branch_to_eco, None, true, 10, 10, &mut rng).unwrap();
            *counts.entry(winner).or_insert(0u32) += 1;
        }

        assert_eq!(counts.len(), candidate_count);
        let expected = TRIALS as f64 / candidate_count as f64;
        for count in counts.values() {
            let deviation = (*count as f64 - expected).abs() / expected;
            assert!(deviation < 0.05, "frequency deviated by {:.1}%", deviation * 100.0);
        }
    }
}
