//! Хост-реализации ядер из `kernels/mm_kernel.cl`

use super::{BoundArg, Object};
use crate::opencl::status::ClStatus;
use crate::opencl::types::*;
use std::collections::HashMap;

const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Вид параметра ядра
#[derive(Debug)]
pub(super) enum Param {
    /// `__global float*`
    Global,
    /// `__local float*`
    Local,
    /// `const int`
    Int,
}

pub(super) struct HostKernel {
    pub name: &'static str,
    pub params: &'static [Param],
    pub run: fn(&mut Launch<'_>) -> Result<(), ClStatus>,
}

static KERNELS: [HostKernel; 2] = [
    HostKernel {
        name: "matrix_mul",
        params: &[Param::Global, Param::Global, Param::Global, Param::Local, Param::Local],
        run: matrix_mul_tiled,
    },
    HostKernel {
        name: "matrixMul",
        params: &[Param::Global, Param::Global, Param::Global, Param::Int, Param::Int],
        run: matrix_mul_naive,
    },
];

pub(super) fn lookup(name: &str) -> Option<&'static HostKernel> {
    KERNELS.iter().find(|kernel| kernel.name == name)
}

/// Один запуск ядра: размеры сетки и привязанные аргументы
pub(super) struct Launch<'a> {
    pub global: &'a [usize],
    pub local: &'a [usize],
    args: &'a [BoundArg],
    objects: &'a mut HashMap<usize, Object>,
}

impl<'a> Launch<'a> {
    pub(super) fn new(
        global: &'a [usize],
        local: &'a [usize],
        args: &'a [BoundArg],
        objects: &'a mut HashMap<usize, Object>,
    ) -> Self {
        Self {
            global,
            local,
            args,
            objects,
        }
    }

    fn buffer_id(&self, index: usize) -> Result<usize, ClStatus> {
        match self.args.get(index) {
            Some(BoundArg::Mem(id)) => Ok(*id),
            _ => Err(ClStatus(CL_INVALID_KERNEL_ARGS)),
        }
    }

    /// Читает `len` чисел из глобального буфера; выход за границы буфера
    /// на настоящем устройстве — ошибка доступа к памяти
    fn read_floats(&self, index: usize, len: usize) -> Result<Vec<f32>, ClStatus> {
        let id = self.buffer_id(index)?;
        match self.objects.get(&id) {
            Some(Object::Buffer { data, .. }) if data.len() >= len * FLOAT_SIZE => {
                let mut values = vec![0.0f32; len];
                bytemuck::cast_slice_mut(&mut values).copy_from_slice(&data[..len * FLOAT_SIZE]);
                Ok(values)
            }
            Some(Object::Buffer { .. }) => Err(ClStatus(CL_OUT_OF_RESOURCES)),
            _ => Err(ClStatus(CL_INVALID_MEM_OBJECT)),
        }
    }

    fn write_floats(&mut self, index: usize, values: &[f32]) -> Result<(), ClStatus> {
        let id = self.buffer_id(index)?;
        match self.objects.get_mut(&id) {
            Some(Object::Buffer { data, .. }) if data.len() >= values.len() * FLOAT_SIZE => {
                data[..values.len() * FLOAT_SIZE].copy_from_slice(bytemuck::cast_slice(values));
                Ok(())
            }
            Some(Object::Buffer { .. }) => Err(ClStatus(CL_OUT_OF_RESOURCES)),
            _ => Err(ClStatus(CL_INVALID_MEM_OBJECT)),
        }
    }

    fn int(&self, index: usize) -> Result<i32, ClStatus> {
        match self.args.get(index) {
            Some(BoundArg::Scalar(bytes)) => {
                bytemuck::try_pod_read_unaligned(bytes).map_err(|_| ClStatus(CL_INVALID_ARG_SIZE))
            }
            _ => Err(ClStatus(CL_INVALID_KERNEL_ARGS)),
        }
    }

    fn local_bytes(&self, index: usize) -> Result<usize, ClStatus> {
        match self.args.get(index) {
            Some(BoundArg::Local(size)) => Ok(*size),
            _ => Err(ClStatus(CL_INVALID_KERNEL_ARGS)),
        }
    }
}

/// `matrix_mul(A, B, C, __local tileA, __local tileB)`:
/// размер матрицы берется из глобальной сетки, размер тайла — из рабочей группы
fn matrix_mul_tiled(launch: &mut Launch<'_>) -> Result<(), ClStatus> {
    if launch.global.len() != 2 || launch.global[0] != launch.global[1] {
        return Err(ClStatus(CL_INVALID_GLOBAL_WORK_SIZE));
    }
    if launch.local[0] != launch.local[1] {
        return Err(ClStatus(CL_INVALID_WORK_GROUP_SIZE));
    }
    let dim = launch.global[0];
    let tile = launch.local[0];
    let tile_bytes = tile * tile * FLOAT_SIZE;
    if launch.local_bytes(3)? < tile_bytes || launch.local_bytes(4)? < tile_bytes {
        return Err(ClStatus(CL_INVALID_ARG_SIZE));
    }

    let a = launch.read_floats(0, dim * dim)?;
    let b = launch.read_floats(1, dim * dim)?;
    let mut c = vec![0.0f32; dim * dim];

    let groups = dim / tile;
    let mut tile_a = vec![0.0f32; tile * tile];
    let mut tile_b = vec![0.0f32; tile * tile];
    let mut acc = vec![0.0f32; tile * tile];

    for group_row in 0..groups {
        for group_col in 0..groups {
            acc.iter_mut().for_each(|v| *v = 0.0);
            for block in 0..groups {
                // Загрузка тайлов в локальную память рабочей группы
                for local_row in 0..tile {
                    for local_col in 0..tile {
                        let row = group_row * tile + local_row;
                        let col = group_col * tile + local_col;
                        tile_a[local_row * tile + local_col] =
                            a[row * dim + block * tile + local_col];
                        tile_b[local_row * tile + local_col] =
                            b[(block * tile + local_row) * dim + col];
                    }
                }
                // barrier(CLK_LOCAL_MEM_FENCE)
                for local_row in 0..tile {
                    for local_col in 0..tile {
                        let mut sum = acc[local_row * tile + local_col];
                        for k in 0..tile {
                            sum += tile_a[local_row * tile + k] * tile_b[k * tile + local_col];
                        }
                        acc[local_row * tile + local_col] = sum;
                    }
                }
            }
            for local_row in 0..tile {
                let row = group_row * tile + local_row;
                let start = row * dim + group_col * tile;
                c[start..start + tile].copy_from_slice(&acc[local_row * tile..(local_row + 1) * tile]);
            }
        }
    }

    launch.write_floats(2, &c)
}

/// `matrixMul(A, B, C, int widthA, int widthC)`: один work-item на элемент C
fn matrix_mul_naive(launch: &mut Launch<'_>) -> Result<(), ClStatus> {
    if launch.global.len() != 2 {
        return Err(ClStatus(CL_INVALID_WORK_DIMENSION));
    }
    let width_a = usize::try_from(launch.int(3)?).map_err(|_| ClStatus(CL_INVALID_ARG_VALUE))?;
    let width_c = usize::try_from(launch.int(4)?).map_err(|_| ClStatus(CL_INVALID_ARG_VALUE))?;
    let (cols, rows) = (launch.global[0], launch.global[1]);
    if cols > width_c {
        return Err(ClStatus(CL_INVALID_GLOBAL_WORK_SIZE));
    }

    let a = launch.read_floats(0, rows * width_a)?;
    let b = launch.read_floats(1, width_a * width_c)?;
    let mut c = launch.read_floats(2, rows * width_c)?;

    for row in 0..rows {
        for col in 0..cols {
            let mut value = 0.0f32;
            for k in 0..width_a {
                value += a[row * width_a + k] * b[k * width_c + col];
            }
            c[row * width_c + col] = value;
        }
    }

    launch.write_floats(2, &c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(values: &[f32]) -> Object {
        Object::Buffer {
            context: 0,
            data: bytemuck::cast_slice(values).to_vec(),
        }
    }

    fn floats(objects: &HashMap<usize, Object>, id: usize) -> Vec<f32> {
        match objects.get(&id) {
            Some(Object::Buffer { data, .. }) => {
                let mut values = vec![0.0f32; data.len() / FLOAT_SIZE];
                bytemuck::cast_slice_mut(&mut values).copy_from_slice(data);
                values
            }
            _ => panic!("not a buffer"),
        }
    }

    fn objects_for(a: &[f32], b: &[f32]) -> HashMap<usize, Object> {
        let mut objects = HashMap::new();
        objects.insert(1, buffer(a));
        objects.insert(2, buffer(b));
        objects.insert(3, buffer(&vec![0.0; a.len()]));
        objects
    }

    #[test]
    fn test_tiled_kernel_matches_naive_kernel() {
        let dim = 8;
        let a: Vec<f32> = (0..dim * dim).map(|i| (i % 7) as f32 - 3.0).collect();
        let b: Vec<f32> = (0..dim * dim).map(|i| (i % 5) as f32 * 0.5).collect();

        let global = [dim, dim];
        let mut tiled = objects_for(&a, &b);
        let args = [
            BoundArg::Mem(1),
            BoundArg::Mem(2),
            BoundArg::Mem(3),
            BoundArg::Local(4 * 4 * 4),
            BoundArg::Local(4 * 4 * 4),
        ];
        let mut launch = Launch::new(&global, &[4, 4], &args, &mut tiled);
        matrix_mul_tiled(&mut launch).unwrap();

        let mut naive = objects_for(&a, &b);
        let width = bytemuck::bytes_of(&(dim as i32)).to_vec();
        let args = [
            BoundArg::Mem(1),
            BoundArg::Mem(2),
            BoundArg::Mem(3),
            BoundArg::Scalar(width.clone()),
            BoundArg::Scalar(width),
        ];
        let mut launch = Launch::new(&global, &[2, 2], &args, &mut naive);
        matrix_mul_naive(&mut launch).unwrap();

        assert_eq!(floats(&tiled, 3), floats(&naive, 3));
    }

    #[test]
    fn test_tiled_kernel_rejects_small_scratch() {
        let mut objects = objects_for(&[1.0; 16], &[1.0; 16]);
        let args = [
            BoundArg::Mem(1),
            BoundArg::Mem(2),
            BoundArg::Mem(3),
            BoundArg::Local(4),
            BoundArg::Local(4),
        ];
        let mut launch = Launch::new(&[4, 4], &[2, 2], &args, &mut objects);
        assert_eq!(matrix_mul_tiled(&mut launch), Err(ClStatus(CL_INVALID_ARG_SIZE)));
    }

    #[test]
    fn test_lookup_known_entry_points() {
        assert!(lookup("matrix_mul").is_some());
        assert!(lookup("matrixMul").is_some());
        assert!(lookup("matrix_multiply").is_none());
    }
}
