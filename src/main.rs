//! Délinéation de houppiers d'arbres à partir d'un nuage de points LiDAR.
//!
//! Usage :
//!   cargo run --release -- nuage.csv
//!   cargo run --release -- nuage.csv --cd2th 0.7 --min-height 3 --kernel improved
//!
//! Entrée : CSV avec trois colonnes x,y,z (en-tête optionnel).
//! Produit :
//!   houppiers.csv — x, y, z, mode_x, mode_y, mode_z, crown_id

use meanshiftr::{
    segment_tree_crowns_with_progress, KernelVariant, LabeledPoint, Point3D,
    SegmentationParams, StitchStrategy,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use clap::Parser;
use csv::{ReaderBuilder, Writer};

// ==========================================================================
// Lecture du nuage de points (CSV x,y,z)
// ==========================================================================

fn parse_xyz(record: &csv::StringRecord) -> Option<Point3D> {
    if record.len() < 3 {
        return None;
    }
    let x = record.get(0)?.trim().parse().ok()?;
    let y = record.get(1)?.trim().parse().ok()?;
    let z = record.get(2)?.trim().parse().ok()?;
    Some([x, y, z])
}

fn load_cloud(path: &str) -> Vec<Point3D> {
    let file = File::open(path).unwrap_or_else(|e| {
        eprintln!("Impossible d'ouvrir '{}' : {}", path, e);
        std::process::exit(1);
    });
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut points: Vec<Point3D> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.unwrap_or_else(|e| {
            eprintln!("Erreur lecture CSV '{}' : {}", path, e);
            std::process::exit(1);
        });
        match parse_xyz(&record) {
            Some(p) => points.push(p),
            // La première ligne peut être un en-tête ; ailleurs c'est une erreur.
            None if i == 0 => continue,
            None => {
                eprintln!(
                    "Ligne {} de '{}' : trois colonnes numériques x,y,z attendues",
                    i + 1,
                    path
                );
                std::process::exit(1);
            }
        }
    }
    points
}

// ==========================================================================
// Export CSV
// ==========================================================================

fn export_csv(points: &[LabeledPoint], path: &str, source_per_point: Option<&[String]>) {
    let file = File::create(path).unwrap_or_else(|e| {
        eprintln!("Impossible de créer '{}' : {}", path, e);
        std::process::exit(1);
    });
    let mut wtr = Writer::from_writer(BufWriter::new(file));

    let with_source = source_per_point.is_some();
    let mut header: Vec<&str> = Vec::new();
    if with_source {
        header.push("source");
    }
    header.extend(["x", "y", "z", "mode_x", "mode_y", "mode_z", "crown_id"]);
    wtr.write_record(header).unwrap();

    for (i, p) in points.iter().enumerate() {
        let x = format!("{:.3}", p.x);
        let y = format!("{:.3}", p.y);
        let z = format!("{:.3}", p.z);
        let mx = format!("{:.3}", p.mode_x);
        let my = format!("{:.3}", p.mode_y);
        let mz = format!("{:.3}", p.mode_z);
        let id = p.crown_id.to_string();

        let mut row: Vec<&str> = Vec::new();
        if let Some(sources) = source_per_point {
            if i < sources.len() {
                row.push(sources[i].as_str());
            }
        }
        row.extend([
            x.as_str(),
            y.as_str(),
            z.as_str(),
            mx.as_str(),
            my.as_str(),
            mz.as_str(),
            id.as_str(),
        ]);
        wtr.write_record(row).unwrap();
    }

    wtr.flush().unwrap_or_else(|e| {
        eprintln!("Erreur flush CSV : {}", e);
        std::process::exit(1);
    });
}

// ==========================================================================
// CLI (clap)
// ==========================================================================

#[derive(Parser, Debug)]
#[command(
    name = "meanshiftr",
    about = "Délinéation de houppiers par mean shift adaptatif (AMS3D)",
    after_help = "Produit : houppiers.csv — x, y, z, mode_x, mode_y, mode_z, crown_id"
)]
struct Cli {
    /// Fichier(s) CSV x,y,z en entrée (un ou plusieurs)
    #[arg(value_name = "nuage.csv", num_args = 1..)]
    cloud_paths: Vec<String>,

    /// Rapport diamètre de houppier / hauteur d'arbre
    #[arg(long, default_value_t = 0.6)]
    cd2th: f64,

    /// Rapport hauteur de houppier / hauteur d'arbre
    #[arg(long, default_value_t = 0.8)]
    ch2th: f64,

    /// Nombre max d'itérations du noyau par point
    #[arg(long, default_value_t = 200)]
    max_iter: usize,

    /// Seuil de convergence (m)
    #[arg(long, default_value_t = 0.01)]
    epsilon: f64,

    /// Variante de noyau : "classic" ou "improved"
    #[arg(long, default_value = "classic")]
    kernel: String,

    /// Noyau uniforme (pas de pondération par la distance)
    #[arg(long)]
    uniform: bool,

    /// Hauteur min des points (m) ; en dessous, ils sont écartés
    #[arg(long, default_value_t = 2.0)]
    min_height: f64,

    /// Largeur des tuiles de cœur (m)
    #[arg(long, default_value_t = 30.0)]
    core_width: f64,

    /// Largeur du tampon autour de chaque tuile (m)
    #[arg(long, default_value_t = 10.0)]
    buffer_width: f64,

    /// Rayon de voisinage du clustering des modes (m)
    #[arg(long, default_value_t = 1.0)]
    eps: f64,

    /// Nombre min d'autres modes dans le voisinage pour un mode cœur
    #[arg(long, default_value_t = 1)]
    min_pts: usize,

    /// Rattachement inter-tuiles : "center" ou "rounded"
    #[arg(long, default_value = "center")]
    stitch: String,

    /// Fraction des CPU utilisée par les workers
    #[arg(long, default_value_t = 1.0)]
    workers: f64,

    /// Renuméroter les houppiers densément à partir de 1
    #[arg(long)]
    compact: bool,

    /// Fichier CSV de sortie
    #[arg(long, short, default_value = "houppiers.csv")]
    output: String,
}

// ==========================================================================
// Main
// ==========================================================================

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.cloud_paths.is_empty() {
        eprintln!("Erreur : au moins un fichier nuage.csv requis.");
        std::process::exit(1);
    }

    let kernel_variant = match cli.kernel.as_str() {
        "classic" | "Classic" => KernelVariant::Classic,
        "improved" | "Improved" => KernelVariant::Improved,
        other => {
            eprintln!("Variante de noyau inconnue : '{}'", other);
            std::process::exit(1);
        }
    };
    let stitch_strategy = match cli.stitch.as_str() {
        "center" => StitchStrategy::ClusterCenter,
        "rounded" => StitchStrategy::RoundedMode,
        other => {
            eprintln!("Stratégie de rattachement inconnue : '{}'", other);
            std::process::exit(1);
        }
    };

    let params = SegmentationParams {
        crown_diameter_to_height: cli.cd2th,
        crown_height_to_height: cli.ch2th,
        max_iterations: cli.max_iter,
        convergence_epsilon: cli.epsilon,
        kernel_variant,
        uniform_kernel: cli.uniform,
        min_height: cli.min_height,
        core_width: cli.core_width,
        buffer_width: cli.buffer_width,
        cluster_eps: cli.eps,
        cluster_min_pts: cli.min_pts,
        stitch_strategy,
        worker_fraction: cli.workers,
        compact_crown_ids: cli.compact,
    };

    println!("══════════════════════════════════════════════════════════");
    println!("  meanshiftr — Délinéation de houppiers (AMS3D)");
    println!("══════════════════════════════════════════════════════════\n");

    println!("1. Paramètres :");
    println!(
        "   cd2th={:.2}  ch2th={:.2}  noyau={}  min_height={:.1}m",
        cli.cd2th, cli.ch2th, cli.kernel, cli.min_height
    );
    println!(
        "   tuiles : cœur={:.0}m  tampon={:.0}m  |  clustering : eps={:.2}  min_pts={}",
        cli.core_width, cli.buffer_width, cli.eps, cli.min_pts
    );
    if cli.uniform {
        println!("   noyau uniforme : oui");
    }
    println!();

    let mut all_points: Vec<LabeledPoint> = Vec::new();
    let mut all_sources: Vec<String> = Vec::new();
    let mut id_offset: u32 = 0;

    for cloud_path in &cli.cloud_paths {
        println!("2. Chargement de '{}'...", cloud_path);
        let cloud = load_cloud(cloud_path);
        println!("   {} points lus", cloud.len());

        println!("3. Segmentation en cours...");
        let t0 = std::time::Instant::now();
        let progress = |done: usize, total: usize| {
            print!("\r   tuiles : {}/{}", done, total);
            let _ = std::io::stdout().flush();
        };
        let labeled =
            segment_tree_crowns_with_progress(&cloud, &params, Some(&progress))
                .unwrap_or_else(|e| {
                    eprintln!("\nErreur de segmentation : {}", e);
                    std::process::exit(1);
                });
        let dt = t0.elapsed();

        let n_crowns = labeled
            .iter()
            .filter(|p| p.crown_id != 0)
            .map(|p| p.crown_id)
            .collect::<std::collections::HashSet<_>>()
            .len();
        println!(
            "\n   ✓ {} houppiers sur {} points en {:.2}s\n",
            n_crowns,
            labeled.len(),
            dt.as_secs_f64()
        );

        // Décaler les identifiants pour qu'ils restent uniques entre fichiers.
        let n = all_points.len();
        let mut file_max: u32 = 0;
        for mut p in labeled {
            if p.crown_id != 0 {
                p.crown_id += id_offset;
                file_max = file_max.max(p.crown_id);
            }
            all_points.push(p);
        }
        if file_max > 0 {
            id_offset = file_max + 1;
        }
        if cli.cloud_paths.len() > 1 {
            let path = cloud_path.clone();
            for _ in n..all_points.len() {
                all_sources.push(path.clone());
            }
        }
    }

    // Statistiques agrégées
    if !all_points.is_empty() {
        let mut crown_sizes: HashMap<u32, usize> = HashMap::new();
        let mut crown_apex: HashMap<u32, f64> = HashMap::new();
        let mut noise_count = 0usize;
        for p in &all_points {
            if p.crown_id == 0 {
                noise_count += 1;
                continue;
            }
            *crown_sizes.entry(p.crown_id).or_insert(0) += 1;
            let apex = crown_apex.entry(p.crown_id).or_insert(f64::NEG_INFINITY);
            if p.z > *apex {
                *apex = p.z;
            }
        }

        println!("4. Statistiques :");
        println!("   Houppiers   : {}", crown_sizes.len());
        println!(
            "   Bruit       : {} points ({:.1}%)",
            noise_count,
            100.0 * noise_count as f64 / all_points.len() as f64
        );
        if !crown_sizes.is_empty() {
            let mean_size =
                crown_sizes.values().sum::<usize>() as f64 / crown_sizes.len() as f64;
            println!("   Taille moy. : {:.1} points/houppier", mean_size);

            let mut ranked: Vec<(u32, usize)> =
                crown_sizes.iter().map(|(&id, &n)| (id, n)).collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            println!("\n   Top 10 houppiers les plus fournis :");
            println!("   {:>8}  {:>8}  {:>8}", "ID", "Points", "Apex (m)");
            println!("   {}", "─".repeat(30));
            for (id, n) in ranked.iter().take(10) {
                println!("   {:>8}  {:>8}  {:>8.1}", id, n, crown_apex[id]);
            }
        }
    }

    println!("\n5. Export → '{}'", cli.output);
    let with_source = cli.cloud_paths.len() > 1 && !all_sources.is_empty();
    export_csv(
        &all_points,
        &cli.output,
        with_source.then(|| all_sources.as_slice()),
    );
    println!("   {} lignes écrites.", all_points.len());

    println!("\n══════════════════════════════════════════════════════════");
    println!("  ✓ Terminé — {} points étiquetés", all_points.len());
    println!("══════════════════════════════════════════════════════════");
}
