//! StrideChain CLI - key management, request signing and offline ledger inspection

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use stridechain::{
    attestation::{attestation_signing_bytes, withdrawal_signing_bytes, WitnessVerdict},
    crypto::{Hash, Keypair, SecretKey},
    ingress::Request,
    ledger::{BatchPolicy, EntryKind, HistoryCursor, Ledger, LedgerConfig, LedgerStore},
    rewards::{MintCapability, RewardEngine, RewardSchedule},
    staking::{stake_signing_bytes, StakeAction, StakeManager, StakingConfig},
    types::{now_millis, timestamp_to_datetime, Address, ClaimSubmission, StrideAmount},
};

fn print_help() {
    println!("StrideChain CLI v{}", stridechain::VERSION);
    println!();
    println!("USAGE:");
    println!("    stridechain-cli <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    keygen [out]                                    Generate a keypair, optionally writing the secret to <out>");
    println!("    sign-claim <key> <meters> <seconds> [at_ms]     Build and sign a claim submission");
    println!("    attest <key> <claim> confirm|dispute            Sign a witness verdict");
    println!("    withdraw <key> <claim>                          Sign a claim withdrawal");
    println!("    sign-stake <key> lock|release <amount> <nonce>  Sign a stake request");
    println!("    account <data_dir> <address>                    Show an account");
    println!("    history <data_dir> <address> [limit]            List committed activity");
    println!("    verify-chain <data_dir>                         Re-verify the chain from entry 0");
    println!("    help                                            Show this help");
    println!();
    println!("<key> is a file holding a hex secret key.");
    println!("sign-claim, attest, withdraw and sign-stake print one JSON request line");
    println!("for stridechain-node's stdin, e.g. `stridechain-cli attest ... | stridechain-node`.");
}

fn emit(request: &Request) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(request)?);
    Ok(())
}

fn read_keypair(path: &str) -> anyhow::Result<Keypair> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading key file {path}"))?;
    Ok(Keypair::from_secret(SecretKey::from_hex(content.trim())?))
}

fn arg<'a>(args: &'a [String], index: usize, usage: &str) -> anyhow::Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value),
        None => bail!("usage: stridechain-cli {usage}"),
    }
}

/// Open a data dir's ledger for reading.
///
/// Replaying entries depends on neither the authority nor the configured
/// rates, so an ephemeral authority is enough here.
fn open_ledger(data_dir: &Path) -> anyhow::Result<Ledger> {
    let authority = Keypair::generate();
    let key = *authority.public_key();
    let ledger = Ledger::new(
        LedgerConfig::new(BatchPolicy::Strict),
        RewardEngine::new(RewardSchedule::default(), key),
        StakeManager::new(StakingConfig::default(), key),
        MintCapability::grant(&authority, &key)?,
    )?;
    let path = data_dir.join("ledger");
    let store = LedgerStore::open(&path).with_context(|| format!("opening ledger at {}", path.display()))?;
    Ok(ledger.with_store(store)?)
}

fn keygen(out: Option<&str>) -> anyhow::Result<()> {
    let keypair = Keypair::generate();
    let secret = hex::encode(keypair.secret_key().to_bytes());
    println!("Generated new keypair:");
    println!("  Address:    {}", Address::from_public_key(keypair.public_key()));
    println!("  Public Key: {}", keypair.public_key().to_hex());
    match out {
        Some(path) => {
            std::fs::write(path, &secret).with_context(|| format!("writing {path}"))?;
            println!("  Secret key written to {path}");
        }
        None => println!("  Secret Key: {secret}"),
    }
    Ok(())
}

fn sign_claim(args: &[String]) -> anyhow::Result<()> {
    const USAGE: &str = "sign-claim <key> <meters> <seconds> [at_ms]";
    let owner = read_keypair(arg(args, 0, USAGE)?)?;
    let distance_m: i64 = arg(args, 1, USAGE)?.parse().context("meters")?;
    let duration_s: i64 = arg(args, 2, USAGE)?.parse().context("seconds")?;
    let claimed_at = match args.get(3) {
        Some(at) => at.parse().context("at_ms")?,
        None => now_millis(),
    };

    let submission = ClaimSubmission::signed(&owner, distance_m, duration_s, claimed_at, None);
    eprintln!("Claim: {}", submission.claim_hash);
    emit(&Request::SubmitClaim { submission })
}

fn attest(args: &[String]) -> anyhow::Result<()> {
    const USAGE: &str = "attest <key> <claim> confirm|dispute";
    let witness = read_keypair(arg(args, 0, USAGE)?)?;
    let claim = Hash::from_hex(arg(args, 1, USAGE)?)?;
    let verdict = match arg(args, 2, USAGE)? {
        "confirm" => WitnessVerdict::Confirm,
        "dispute" => WitnessVerdict::Dispute,
        other => bail!("unknown verdict {other}"),
    };

    let signature = witness.sign(&attestation_signing_bytes(&claim, witness.public_key(), verdict));
    eprintln!("Witness {} signs {verdict:?} for {claim}", witness.public_key().to_hex());
    emit(&Request::Attest {
        claim,
        witness: *witness.public_key(),
        verdict,
        signature,
    })
}

fn withdraw(args: &[String]) -> anyhow::Result<()> {
    const USAGE: &str = "withdraw <key> <claim>";
    let owner = read_keypair(arg(args, 0, USAGE)?)?;
    let claim = Hash::from_hex(arg(args, 1, USAGE)?)?;
    emit(&Request::WithdrawClaim {
        claim,
        signature: owner.sign(&withdrawal_signing_bytes(&claim)),
    })
}

fn sign_stake(args: &[String]) -> anyhow::Result<()> {
    const USAGE: &str = "sign-stake <key> lock|release <amount> <nonce>";
    let owner = read_keypair(arg(args, 0, USAGE)?)?;
    let action = match arg(args, 1, USAGE)? {
        "lock" => StakeAction::Lock,
        "release" => StakeAction::Release,
        other => bail!("unknown stake action {other}"),
    };
    let amount = StrideAmount::from_decimal_str(arg(args, 2, USAGE)?)?;
    let nonce: u64 = arg(args, 3, USAGE)?.parse().context("nonce")?;

    let address = Address::from_public_key(owner.public_key());
    let signature = owner.sign(&stake_signing_bytes(action, &address, amount, nonce));
    eprintln!("Account {address}: {action:?} {amount} at nonce {nonce}");
    let owner = *owner.public_key();
    emit(&match action {
        StakeAction::Lock => Request::Stake {
            owner,
            amount,
            signature,
        },
        StakeAction::Release => Request::WithdrawStake {
            owner,
            amount,
            signature,
        },
    })
}

fn account(args: &[String]) -> anyhow::Result<()> {
    const USAGE: &str = "account <data_dir> <address>";
    let ledger = open_ledger(&PathBuf::from(arg(args, 0, USAGE)?))?;
    let address = Address::from_hex(arg(args, 1, USAGE)?)?;

    let Some(account) = ledger.account(&address) else {
        println!("No account {address}");
        return Ok(());
    };
    println!("Account {address}");
    println!("  Balance:   {}", account.balance);
    println!("  Staked:    {}", account.staked);
    println!("  Available: {}", account.available());
    println!("  Nonce:     {}", account.nonce);
    if let Some(stake) = ledger.stake_position(&address) {
        println!("  Stake:     {:?}, lock expires at {}", stake.state, stake.lock_expiry);
    }
    Ok(())
}

fn history(args: &[String]) -> anyhow::Result<()> {
    const USAGE: &str = "history <data_dir> <address> [limit]";
    let ledger = open_ledger(&PathBuf::from(arg(args, 0, USAGE)?))?;
    let address = Address::from_hex(arg(args, 1, USAGE)?)?;
    let limit: usize = match args.get(2) {
        Some(limit) => limit.parse().context("limit")?,
        None => usize::MAX,
    };

    let mut cursor: Option<HistoryCursor> = None;
    let mut shown = 0;
    while shown < limit {
        let page = ledger.history(&address, cursor, limit - shown);
        for entry in &page.entries {
            if let EntryKind::Activity { claim, reward, witnesses } = &entry.kind {
                let at = timestamp_to_datetime(claim.claimed_at)
                    .map_or_else(|| claim.claimed_at.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
                println!(
                    "#{:<6} {}  {:>7} m {:>6} s  +{}  ({} witnesses)  {}",
                    entry.index,
                    at,
                    claim.distance_m,
                    claim.duration_s,
                    reward,
                    witnesses.len(),
                    claim.claim_hash
                );
            }
        }
        shown += page.entries.len();
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    if shown == 0 {
        println!("No activity for {address}");
    }
    Ok(())
}

fn verify_chain(args: &[String]) -> anyhow::Result<()> {
    const USAGE: &str = "verify-chain <data_dir>";
    let ledger = open_ledger(&PathBuf::from(arg(args, 0, USAGE)?))?;
    let report = ledger.verify_chain()?;

    println!("Chain OK");
    println!("  Entries:   {}", report.entries);
    println!("  Tip:       {}", report.tip);
    println!("  Accounts:  {}", report.accounts);
    println!("  Allocated: {}", report.supply.total_allocated);
    println!("  Rewarded:  {}", report.supply.total_rewarded);
    println!("  Slashed:   {}", report.supply.total_slashed);
    println!("  Staked:    {}", report.supply.total_staked);
    println!("  State:     {}", ledger.state_root());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "keygen" => keygen(rest.first().map(String::as_str)),
        "sign-claim" => sign_claim(rest),
        "attest" => attest(rest),
        "withdraw" => withdraw(rest),
        "sign-stake" => sign_stake(rest),
        "account" => account(rest),
        "history" => history(rest),
        "verify-chain" => verify_chain(rest),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => bail!("unknown command {other}; try `stridechain-cli help`"),
    }
}
